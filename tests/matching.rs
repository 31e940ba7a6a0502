use anyhow::Result;
use facematch::{
    CaseRecord, Embedding, EmbeddingRepository, Error, InMemoryRepository, MatchOutcome,
    MatchWorkflow, Origin, Params, Status,
};

fn emb(v: &[f32]) -> Embedding {
    Embedding::new(v.to_vec()).unwrap()
}

fn params(dimension: usize) -> Params {
    Params {
        dimension,
        ..Params::default()
    }
}

#[test]
fn identical_embeddings_are_proposed() -> Result<()> {
    let v: Vec<f32> = (0..512).map(|i| (i as f32 * 0.37).sin()).collect();
    let repo = InMemoryRepository::new(512);
    repo.insert(CaseRecord::registered("reg1", "alice", Some(&emb(&v))))?;
    repo.insert(CaseRecord::sighting("pub1", Some(&emb(&v))))?;

    let workflow = MatchWorkflow::new(&repo, Params::default())?;
    let MatchOutcome::Compared(report) = workflow.propose_matches()? else {
        panic!("expected a comparison");
    };
    assert_eq!(report.matches["reg1"], vec!["pub1".to_string()]);
    assert!((report.candidates[0].similarity - 1.0).abs() < 1e-5);

    // proposals never change status
    let reg = repo.get(Origin::Registered, "reg1")?.unwrap();
    assert_eq!(reg.status, Status::NotFound);
    Ok(())
}

#[test]
fn orthogonal_embeddings_are_not_proposed() -> Result<()> {
    let repo = InMemoryRepository::new(2);
    repo.insert(CaseRecord::registered("reg1", "alice", Some(&emb(&[1.0, 0.0]))))?;
    repo.insert(CaseRecord::sighting("pub1", Some(&emb(&[0.0, 1.0]))))?;
    let workflow = MatchWorkflow::new(&repo, params(2))?;
    let outcome = workflow.propose_matches()?;
    assert!(!outcome.is_empty_comparison());
    assert!(outcome.matches().unwrap().is_empty());
    Ok(())
}

#[test]
fn no_registered_cases_is_empty_comparison() -> Result<()> {
    let repo = InMemoryRepository::new(2);
    repo.insert(CaseRecord::sighting("pub1", Some(&emb(&[1.0, 0.0]))))?;
    let workflow = MatchWorkflow::new(&repo, params(2))?;
    let outcome = workflow.propose_matches()?;
    assert!(outcome.is_empty_comparison());
    assert_eq!(outcome.matches(), None);
    Ok(())
}

#[test]
fn malformed_embeddings_are_excluded_and_counted() -> Result<()> {
    let repo = InMemoryRepository::new(2);
    repo.insert(CaseRecord::registered("reg1", "alice", Some(&emb(&[1.0, 0.0]))))?;
    repo.insert(CaseRecord::registered("reg2", "alice", None).with_raw_embedding("[0.5]"))?;
    repo.insert(CaseRecord::sighting("pub1", Some(&emb(&[0.9, 0.1]))))?;
    repo.insert(CaseRecord::sighting("pub2", None).with_raw_embedding("{oops"))?;

    let workflow = MatchWorkflow::new(&repo, params(2))?;
    let MatchOutcome::Compared(report) = workflow.propose_matches()? else {
        panic!("expected a comparison");
    };
    assert_eq!(report.excluded_registered, 1);
    assert_eq!(report.excluded_sightings, 1);
    assert_eq!(report.pairs_compared, 1);
    assert_eq!(report.matches["reg1"], vec!["pub1".to_string()]);
    Ok(())
}

#[test]
fn confirmed_cases_leave_the_pool() -> Result<()> {
    let repo = InMemoryRepository::new(2);
    repo.insert(CaseRecord::registered("reg1", "alice", Some(&emb(&[1.0, 0.0]))))?;
    repo.insert(CaseRecord::sighting("pub1", Some(&emb(&[1.0, 0.0]))))?;
    repo.insert(CaseRecord::sighting("pub2", Some(&emb(&[1.0, 0.2]))))?;
    let workflow = MatchWorkflow::new(&repo, params(2))?;

    let first = workflow.propose_matches()?;
    assert_eq!(
        first.matches().unwrap()["reg1"],
        vec!["pub1".to_string(), "pub2".to_string()]
    );

    workflow.update_status("reg1", "pub1")?;
    let reg = repo.get(Origin::Registered, "reg1")?.unwrap();
    assert_eq!(reg.status, Status::Found);
    assert_eq!(reg.matched_with.as_deref(), Some("pub1"));
    assert_eq!(
        repo.get(Origin::PublicSighting, "pub1")?.unwrap().status,
        Status::Found
    );

    // reg1 is found now, so pub2 has nothing left to match against
    assert!(workflow.propose_matches()?.is_empty_comparison());
    assert_eq!(
        repo.list_embeddings(Origin::PublicSighting, Status::NotFound)?.len(),
        1
    );
    Ok(())
}

#[test]
fn unknown_id_mutates_nothing() -> Result<()> {
    let repo = InMemoryRepository::new(2);
    repo.insert(CaseRecord::registered("reg1", "alice", Some(&emb(&[1.0, 0.0]))))?;
    repo.insert(CaseRecord::sighting("pub1", Some(&emb(&[1.0, 0.0]))))?;
    let workflow = MatchWorkflow::new(&repo, params(2))?;

    let err = workflow.update_status("unknown", "pub1").unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    let err = workflow.update_status("reg1", "unknown").unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    assert_eq!(
        repo.get(Origin::Registered, "reg1")?.unwrap().status,
        Status::NotFound
    );
    assert_eq!(
        repo.get(Origin::PublicSighting, "pub1")?.unwrap().status,
        Status::NotFound
    );
    Ok(())
}

#[test]
fn threshold_override() -> Result<()> {
    let repo = InMemoryRepository::new(2);
    repo.insert(CaseRecord::registered("reg1", "alice", Some(&emb(&[1.0, 0.0]))))?;
    repo.insert(CaseRecord::sighting("pub1", Some(&emb(&[1.0, 1.0]))))?;
    let workflow = MatchWorkflow::new(&repo, params(2))?;
    // cos 45 degrees is about 0.707
    assert_eq!(workflow.propose_matches_with(0.7)?.matches().unwrap().len(), 1);
    assert_eq!(workflow.propose_matches_with(0.71)?.matches().unwrap().len(), 0);
    Ok(())
}

#[test]
fn invalid_params_rejected() {
    let repo = InMemoryRepository::new(2);
    let params = Params {
        threshold: f32::NAN,
        ..Params::default()
    };
    assert!(MatchWorkflow::new(&repo, params).is_err());
}
