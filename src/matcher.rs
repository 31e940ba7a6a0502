use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::metrics::similarity;
use crate::types::{CaseId, EmbeddingRow, MatchCandidate, MatchOutcome, MatchReport};

/// Default acceptance threshold for a best match.
pub const DEFAULT_THRESHOLD: f32 = 0.35;

struct Usable<'a> {
    id: &'a CaseId,
    vector: &'a [f32],
}

/// Drops rows without an embedding and orders the rest by ascending id.
fn usable(rows: &[EmbeddingRow]) -> (Vec<Usable<'_>>, usize) {
    let mut out: Vec<Usable<'_>> = rows
        .iter()
        .filter_map(|row| {
            row.embedding.as_ref().map(|e| Usable {
                id: &row.case_id,
                vector: e.as_slice(),
            })
        })
        .collect();
    let excluded = rows.len() - out.len();
    out.sort_by(|a, b| a.id.cmp(b.id));
    (out, excluded)
}

fn check_dimension(rows: &[Usable<'_>], expected: usize) -> Result<()> {
    match rows.iter().find(|r| r.vector.len() != expected) {
        Some(r) => Err(Error::DimensionMismatch {
            expected,
            found: r.vector.len(),
        }),
        None => Ok(()),
    }
}

/// Pairs every sighting with its most similar registered case.
///
/// Both sides are compared exhaustively after sorting by ascending case id,
/// so among equally similar registered cases the smallest id wins. A pair is
/// accepted when its similarity is at least `threshold`. Each sighting yields
/// at most one match; a registered case may collect several.
pub fn match_embeddings(
    registered: &[EmbeddingRow],
    sightings: &[EmbeddingRow],
    threshold: f32,
) -> Result<MatchOutcome> {
    if !threshold.is_finite() {
        return Err(Error::InvalidThreshold(threshold));
    }

    let (reg, excluded_registered) = usable(registered);
    let (pub_, excluded_sightings) = usable(sightings);
    if excluded_registered > 0 || excluded_sightings > 0 {
        warn!(
            "excluded rows without usable embedding: {} registered, {} sightings",
            excluded_registered, excluded_sightings
        );
    }

    if reg.is_empty() || pub_.is_empty() {
        info!(
            "no comparison performed: {} registered, {} sightings usable",
            reg.len(),
            pub_.len()
        );
        return Ok(MatchOutcome::EmptyComparisonSet {
            registered: reg.len(),
            sightings: pub_.len(),
            excluded_registered,
            excluded_sightings,
        });
    }

    let dim = reg[0].vector.len();
    check_dimension(&reg, dim)?;
    check_dimension(&pub_, dim)?;

    let mut report = MatchReport {
        excluded_registered,
        excluded_sightings,
        ..MatchReport::default()
    };

    for p in &pub_ {
        let mut best: Option<(&CaseId, f32)> = None;
        for r in &reg {
            let sim = similarity(Some(p.vector), Some(r.vector));
            report.pairs_compared += 1;
            match best {
                Some((_, s)) if sim <= s => {}
                _ => best = Some((r.id, sim)),
            }
        }
        // reg is non-empty, so best is always set
        let Some((reg_id, sim)) = best else { continue };
        if sim >= threshold {
            debug!("match {} -> {} (similarity {:.3})", p.id, reg_id, sim);
            report
                .matches
                .entry(reg_id.clone())
                .or_default()
                .push(p.id.clone());
            report.candidates.push(MatchCandidate {
                sighting_id: p.id.clone(),
                registered_id: reg_id.clone(),
                similarity: sim,
            });
        } else {
            debug!("no match for {} (best similarity {:.3})", p.id, sim);
            report.unmatched.push((p.id.clone(), sim));
        }
    }

    info!(
        "compared {} pairs, {} of {} sightings matched",
        report.pairs_compared,
        report.candidates.len(),
        pub_.len()
    );
    Ok(MatchOutcome::Compared(report))
}
