use anyhow::Result;
use facematch::{
    CaseLog, CaseRecord, Embedding, Error, FileModelStore, InMemoryRepository, KnnClassifier,
    MatchWorkflow, MemoryModelStore, ModelStore, Params, TrainingRow, EMBEDDING_DIM,
};

fn emb(v: &[f32]) -> Embedding {
    Embedding::new(v.to_vec()).unwrap()
}

fn params() -> Params {
    Params {
        dimension: 2,
        ..Params::default()
    }
}

fn repo() -> Result<InMemoryRepository> {
    let repo = InMemoryRepository::new(2);
    repo.insert(CaseRecord::registered("case-a", "alice", Some(&emb(&[0.0, 0.0]))))?;
    repo.insert(CaseRecord::registered("case-b", "alice", Some(&emb(&[10.0, 10.0]))))?;
    repo.insert(
        CaseRecord::registered("case-c", "alice", None).with_raw_embedding("[10.0, null]"),
    )?;
    repo.insert(CaseRecord::registered("case-x", "bob", None))?;
    Ok(repo)
}

#[test]
fn train_then_classify() -> Result<()> {
    let repo = repo()?;
    let store = MemoryModelStore::new();
    let workflow = MatchWorkflow::new(&repo, params())?;

    let summary = workflow.train("alice", &store)?;
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.used_rows, 3);
    assert_eq!(summary.identities, 3);
    assert_eq!(summary.k, 3);

    // case-c's missing value is imputed from the column mean (5.0)
    let artifact = store.load("alice")?;
    assert_eq!(artifact.points[2], vec![10.0, 5.0]);

    let p = workflow.classify("alice", &emb(&[0.5, 0.5]), &store)?;
    assert_eq!(p.label, "case-a");
    let p = workflow.classify("alice", &emb(&[10.0, 5.0]), &store)?;
    assert_eq!(p.label, "case-c");
    assert_eq!(p.confidence, 1.0);
    Ok(())
}

#[test]
fn untrained_submitter() -> Result<()> {
    let repo = repo()?;
    let store = MemoryModelStore::new();
    let workflow = MatchWorkflow::new(&repo, params())?;
    let err = workflow
        .classify("alice", &emb(&[0.0, 0.0]), &store)
        .unwrap_err();
    assert!(matches!(err, Error::ModelNotTrained { .. }));
    Ok(())
}

#[test]
fn no_training_data_keeps_previous_artifact() -> Result<()> {
    let repo = repo()?;
    let dir = tempfile::tempdir()?;
    let store = FileModelStore::new(dir.path())?;
    let workflow = MatchWorkflow::new(&repo, params())?;

    // bob's only case has no embedding
    let err = workflow.train("bob", &store).unwrap_err();
    assert!(matches!(err, Error::NoTrainingData { .. }));
    assert!(!store.path_for("bob").exists());

    let first = workflow.train("alice", &store)?;
    let err = workflow.train("nobody", &store).unwrap_err();
    assert!(matches!(err, Error::NoTrainingData { .. }));
    assert_eq!(store.load("alice")?.created_at, first.created_at);
    Ok(())
}

#[test]
fn retraining_replaces_artifact() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = CaseLog::open(dir.path().join("cases.fmc"), 2)?;
    let store = FileModelStore::new(dir.path().join("models"))?;
    log.register(CaseRecord::registered("case-a", "alice", Some(&emb(&[1.0, 0.0]))))?;
    let workflow = MatchWorkflow::new(&log, params())?;

    let first = workflow.train("alice", &store)?;
    assert_eq!(first.k, 1);
    assert_eq!(store.load("alice")?.codec.classes(), &["case-a"]);

    log.register(CaseRecord::registered("case-b", "alice", Some(&emb(&[0.0, 1.0]))))?;
    let second = workflow.train("alice", &store)?;
    assert_eq!(second.k, 2);
    let artifact = store.load("alice")?;
    assert_eq!(artifact.codec.classes(), &["case-a", "case-b"]);
    assert_eq!(artifact.trained_for, "alice");

    let p = workflow.classify("alice", &emb(&[0.1, 0.9]), &store)?;
    assert_eq!(p.label, "case-b");
    Ok(())
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

struct XorShift(u64);

impl XorShift {
    fn next_f32(&mut self) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 >> 40) as f32 / (1u64 << 24) as f32 * 2.0 - 1.0
    }

    fn vector(&mut self, dim: usize) -> Vec<f32> {
        (0..dim).map(|_| self.next_f32()).collect()
    }
}

/// Weighted vote over the k nearest points, computed the slow way.
fn brute_force_label(points: &[(String, Vec<f32>)], query: &[f32], k: usize) -> String {
    let mut ranked: Vec<(f32, &str)> = points
        .iter()
        .map(|(label, p)| (euclidean(query, p), label.as_str()))
        .collect();
    ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(b.1)));
    ranked.truncate(k);
    let mut votes: Vec<(&str, f64)> = Vec::new();
    for (d, label) in ranked {
        let w = 1.0 / f64::from(d);
        match votes.iter_mut().find(|(l, _)| *l == label) {
            Some(v) => v.1 += w,
            None => votes.push((label, w)),
        }
    }
    votes.sort_by(|a, b| a.0.cmp(b.0));
    let mut best = votes[0];
    for v in &votes[1..] {
        if v.1 > best.1 {
            best = *v;
        }
    }
    best.0.to_string()
}

#[test]
fn full_size_embeddings_match_brute_force() -> Result<()> {
    let dim = EMBEDDING_DIM;
    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);
    // 20 identities with three photos each
    let mut points = Vec::new();
    for id in 0..20 {
        let base = rng.vector(dim);
        for _ in 0..3 {
            let noisy: Vec<f32> = base.iter().map(|x| x + rng.next_f32() * 0.3).collect();
            points.push((format!("case-{id:02}"), noisy));
        }
    }
    let rows: Vec<TrainingRow> = points
        .iter()
        .map(|(label, v)| TrainingRow {
            label: label.clone(),
            embedding: Some(v.iter().copied().map(Some).collect()),
        })
        .collect();
    let queries: Vec<Vec<f32>> = (0..40)
        .map(|i| {
            if i % 2 == 0 {
                points[i].1.iter().map(|x| x + rng.next_f32() * 0.3).collect()
            } else {
                rng.vector(dim)
            }
        })
        .collect();
    let embeddings: Vec<Embedding> = queries.iter().map(|q| emb(q)).collect();

    for max_neighbors in [1, 3] {
        let params = Params {
            max_neighbors,
            ..Params::default()
        };
        let model = KnnClassifier::train("alice", &rows, &params)?;
        assert_eq!(model.k(), max_neighbors);
        let batch = model.classify_batch(&embeddings)?;
        for ((query, embedding), batched) in queries.iter().zip(&embeddings).zip(&batch) {
            let expected = brute_force_label(&points, query, max_neighbors);
            let single = model.classify(embedding)?;
            assert_eq!(single.label, expected);
            assert_eq!(&single, batched);
        }
    }

    // a noisy copy of a training photo is recognised
    let model = KnnClassifier::train("alice", &rows, &Params::default())?;
    assert_eq!(model.classify(&embeddings[4])?.label, points[4].0);
    Ok(())
}
