//! Minutiae matching
//!
//! A probe print (one template) is compared against the templates of an
//! enrolled print. The comparison itself is pluggable through [`Scorer`];
//! [`PairTableScorer`] is the default.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::{
    error::{Error, Result},
    minutiae::XytTemplate,
    print::{Print, PrintKind},
};

/// Outcome of a successful comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    Match,
}

impl MatchResult {
    pub fn is_match(self) -> bool {
        self == Self::Match
    }
}

/// Similarity score between a probe and a gallery template
pub trait Scorer {
    /// Matcher-internal form of the probe, built once per comparison
    type Prepared;

    /// Convert a probe template for repeated scoring
    fn prepare(&self, probe: &XytTemplate) -> Result<Self::Prepared>;

    /// Score the prepared probe against one gallery template
    fn score(&self, probe: &Self::Prepared, gallery: &XytTemplate) -> Result<u32>;
}

/// Compare `probe` against every template of `template`
///
/// Templates are scored in insertion order and the first one reaching
/// `threshold` decides the match; later templates are not looked at.
///
/// # Errors
///
/// - `Incompatible` unless both prints are of kind `Minutiae`
/// - `UnsupportedInput` unless the probe holds exactly one template
/// - `MatchError` when the scorer fails
pub fn match_prints<S: Scorer>(
    template: &Print,
    probe: &Print,
    threshold: u32,
    scorer: &S,
) -> Result<MatchResult> {
    for print in [template, probe] {
        if print.kind() != PrintKind::Minutiae {
            return Err(Error::Incompatible(format!(
                "cannot match a {:?} print",
                print.kind()
            )));
        }
    }

    let probe_template = match probe.templates() {
        [single] => single,
        templates => {
            return Err(Error::UnsupportedInput(format!(
                "probe must hold one template, got {}",
                templates.len()
            )));
        }
    };

    let prepared = scorer.prepare(probe_template).map_err(into_match_error)?;

    for (index, gallery) in template.templates().iter().enumerate() {
        let score = scorer.score(&prepared, gallery).map_err(into_match_error)?;
        trace!(index, score, threshold, "Scored gallery template");

        if score >= threshold {
            debug!(index, score, "Probe matched");
            return Ok(MatchResult::Match);
        }
    }

    debug!(templates = template.templates().len(), "Probe did not match");
    Ok(MatchResult::NoMatch)
}

/// Return the index of the first gallery print that matches `probe`
///
/// # Errors
///
/// Same as [`match_prints`], for the first gallery entry that fails.
pub fn identify<S: Scorer>(
    gallery: &[Print],
    probe: &Print,
    threshold: u32,
    scorer: &S,
) -> Result<Option<usize>> {
    for (index, template) in gallery.iter().enumerate() {
        if match_prints(template, probe, threshold, scorer)?.is_match() {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn into_match_error(err: Error) -> Error {
    match err {
        Error::MatchError(_) => err,
        other => Error::MatchError(other.to_string()),
    }
}

/// Pairs further apart than this are not tabulated
const MAX_PAIR_DISTANCE: f64 = 125.0;

/// Relative distance tolerance between corresponding pairs
const DISTANCE_TOLERANCE: f64 = 0.05;

/// Absolute distance tolerance floor (rounding of pixel positions)
const MIN_DISTANCE_TOLERANCE: f64 = 3.0;

/// Max difference between corresponding relative angles, degrees
const ANGLE_TOLERANCE: i32 = 11;

/// Width of a rotation histogram bin, degrees
const ROTATION_BIN: i32 = 10;

const ROTATION_BINS: usize = (360 / ROTATION_BIN) as usize;

/// One tabulated minutiae pair
///
/// `phi` is the direction of the line from `first` to `second`; the betas
/// are the minutiae angles relative to that line, so they do not change
/// when the finger is rotated or moved.
#[derive(Debug, Clone, Copy)]
struct PairEntry {
    distance: f64,
    phi: i32,
    beta1: i32,
    beta2: i32,
    first: usize,
    second: usize,
}

/// Pair table of a prepared probe
#[derive(Debug, Clone)]
pub struct PairTable {
    entries: Vec<PairEntry>,
    minutiae: usize,
}

impl PairTable {
    fn build(template: &XytTemplate, both_directions: bool) -> Self {
        let rows = template.rows();
        let mut entries = Vec::new();

        let theta: Vec<i32> = rows.iter().map(|row| normalize(row.theta)).collect();

        for i in 0..rows.len() {
            for j in (i + 1)..rows.len() {
                let dx = f64::from(rows[j].x) - f64::from(rows[i].x);
                let dy = f64::from(rows[j].y) - f64::from(rows[i].y);
                let distance = dx.hypot(dy);
                if distance > MAX_PAIR_DISTANCE || distance == 0.0 {
                    continue;
                }

                let phi = dy.atan2(dx).to_degrees().round() as i32;
                entries.push(PairEntry {
                    distance,
                    phi,
                    beta1: normalize(theta[i] - phi),
                    beta2: normalize(theta[j] - phi),
                    first: i,
                    second: j,
                });

                if both_directions {
                    let back = normalize(phi + 180);
                    entries.push(PairEntry {
                        distance,
                        phi: back,
                        beta1: normalize(theta[j] - back),
                        beta2: normalize(theta[i] - back),
                        first: j,
                        second: i,
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        Self {
            entries,
            minutiae: rows.len(),
        }
    }

    /// Number of minutiae in the tabulated template
    pub fn len(&self) -> usize {
        self.minutiae
    }

    pub fn is_empty(&self) -> bool {
        self.minutiae == 0
    }
}

/// A probe pair matched to a gallery pair under some rotation
#[derive(Debug, Clone, Copy)]
struct Candidate {
    rotation: i32,
    probe: (usize, usize),
    gallery: (usize, usize),
}

/// Bozorth-style pair-table scorer
///
/// Both templates are turned into tables of minutiae pairs described by
/// their distance and the two minutiae angles relative to the connecting
/// line. Pairs that agree across templates are grouped by the rotation
/// they imply; within the dominant rotation a one-to-one minutiae
/// correspondence is chosen by vote, and the score is the number of pair
/// matches consistent with it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairTableScorer;

impl Scorer for PairTableScorer {
    type Prepared = PairTable;

    fn prepare(&self, probe: &XytTemplate) -> Result<PairTable> {
        Ok(PairTable::build(probe, false))
    }

    fn score(&self, probe: &PairTable, gallery: &XytTemplate) -> Result<u32> {
        let gallery_table = PairTable::build(gallery, true);
        let candidates = compatible_pairs(probe, &gallery_table);
        if candidates.is_empty() {
            return Ok(0);
        }

        let kept = dominant_rotation(&candidates);
        let assignment = assign(&kept, probe.len());

        let score = kept
            .iter()
            .filter(|c| {
                assignment[c.probe.0] == Some(c.gallery.0) && assignment[c.probe.1] == Some(c.gallery.1)
            })
            .count();

        Ok(score as u32)
    }
}

fn compatible_pairs(probe: &PairTable, gallery: &PairTable) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for p in &probe.entries {
        let tolerance = (p.distance * DISTANCE_TOLERANCE).max(MIN_DISTANCE_TOLERANCE);
        let low = p.distance - tolerance;
        let high = p.distance + tolerance;

        let start = gallery.entries.partition_point(|g| g.distance < low);
        for g in gallery.entries[start..].iter().take_while(|g| g.distance <= high) {
            if normalize(p.beta1 - g.beta1).abs() > ANGLE_TOLERANCE
                || normalize(p.beta2 - g.beta2).abs() > ANGLE_TOLERANCE
            {
                continue;
            }

            candidates.push(Candidate {
                rotation: normalize(g.phi - p.phi),
                probe: (p.first, p.second),
                gallery: (g.first, g.second),
            });
        }
    }

    candidates
}

fn rotation_bin(rotation: i32) -> usize {
    ((rotation + 180).div_euclid(ROTATION_BIN) as usize) % ROTATION_BINS
}

/// Keep the candidates around the most common rotation
fn dominant_rotation(candidates: &[Candidate]) -> Vec<Candidate> {
    let mut histogram = [0usize; ROTATION_BINS];
    for c in candidates {
        histogram[rotation_bin(c.rotation)] += 1;
    }

    let window = |bin: usize| {
        histogram[(bin + ROTATION_BINS - 1) % ROTATION_BINS]
            + histogram[bin]
            + histogram[(bin + 1) % ROTATION_BINS]
    };

    let mut best = 0;
    for bin in 1..ROTATION_BINS {
        if window(bin) > window(best) {
            best = bin;
        }
    }

    candidates
        .iter()
        .filter(|c| {
            let bin = rotation_bin(c.rotation);
            let offset = (bin + ROTATION_BINS - best) % ROTATION_BINS;
            offset <= 1 || offset == ROTATION_BINS - 1
        })
        .copied()
        .collect()
}

/// Greedy one-to-one correspondence from per-minutia votes
fn assign(candidates: &[Candidate], probe_len: usize) -> Vec<Option<usize>> {
    let mut votes: BTreeMap<(usize, usize), u32> = BTreeMap::new();
    for c in candidates {
        *votes.entry((c.probe.0, c.gallery.0)).or_default() += 1;
        *votes.entry((c.probe.1, c.gallery.1)).or_default() += 1;
    }

    let mut ranked: Vec<_> = votes.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut assignment = vec![None; probe_len];
    let mut taken = BTreeSet::new();
    for ((probe, gallery), _) in ranked {
        if assignment[probe].is_none() && !taken.contains(&gallery) {
            assignment[probe] = Some(gallery);
            taken.insert(gallery);
        }
    }

    assignment
}

/// Fold an angle in degrees to (-180, 180]
fn normalize(angle: i32) -> i32 {
    let angle = angle.rem_euclid(360);
    if angle > 180 { angle - 360 } else { angle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minutiae::{XytRow, minutiae_to_xyt};
    use bytes::{BufMut, BytesMut};
    use fprust_types::Minutia;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    /// Twelve well-spread minutiae with varied angles
    fn sample_rows() -> Vec<XytRow> {
        vec![
            XytRow::new(20, 30, 10),
            XytRow::new(35, 80, -45),
            XytRow::new(50, 15, 120),
            XytRow::new(60, 60, 170),
            XytRow::new(75, 100, -90),
            XytRow::new(90, 40, 35),
            XytRow::new(100, 75, -150),
            XytRow::new(110, 20, 80),
            XytRow::new(120, 110, -10),
            XytRow::new(130, 55, 60),
            XytRow::new(145, 90, -120),
            XytRow::new(150, 30, 150),
        ]
    }

    fn print_of(templates: Vec<Vec<XytRow>>) -> Print {
        let mut print = Print::with_kind(1, 1, PrintKind::Minutiae);
        for rows in templates {
            print.add_template(XytTemplate::from_rows(rows).unwrap()).unwrap();
        }
        print
    }

    fn rotate(rows: &[XytRow], degrees: f64, shift: (i32, i32)) -> Vec<XytRow> {
        let (sin, cos) = degrees.to_radians().sin_cos();
        rows.iter()
            .map(|r| {
                let x = r.x as f64 * cos - r.y as f64 * sin;
                let y = r.x as f64 * sin + r.y as f64 * cos;
                XytRow::new(
                    x.round() as i32 + shift.0,
                    y.round() as i32 + shift.1,
                    normalize(r.theta + degrees.round() as i32),
                )
            })
            .collect()
    }

    /// Scores templates by their first x coordinate and counts calls
    struct ScriptedScorer {
        calls: Cell<usize>,
        fail_on: Option<i32>,
    }

    impl ScriptedScorer {
        fn new(fail_on: Option<i32>) -> Self {
            Self {
                calls: Cell::new(0),
                fail_on,
            }
        }
    }

    impl Scorer for ScriptedScorer {
        type Prepared = ();

        fn prepare(&self, _probe: &XytTemplate) -> Result<()> {
            Ok(())
        }

        fn score(&self, _probe: &(), gallery: &XytTemplate) -> Result<u32> {
            self.calls.set(self.calls.get() + 1);
            let key = gallery.rows()[0].x;
            if self.fail_on == Some(key) {
                return Err(Error::MatchError("scorer fault".into()));
            }
            Ok(key as u32)
        }
    }

    #[test]
    fn test_identical_templates_match() {
        let template = print_of(vec![sample_rows()]);
        let probe = print_of(vec![sample_rows()]);

        let result = match_prints(&template, &probe, 40, &PairTableScorer).unwrap();
        assert_eq!(result, MatchResult::Match);
    }

    #[test]
    fn test_rotated_and_shifted_probe_matches() {
        let template = print_of(vec![sample_rows()]);
        let probe = print_of(vec![rotate(&sample_rows(), 15.0, (12, -7))]);

        let result = match_prints(&template, &probe, 40, &PairTableScorer).unwrap();
        assert_eq!(result, MatchResult::Match);
    }

    #[test]
    fn test_small_gallery_cannot_reach_threshold() {
        let template = print_of(vec![vec![
            XytRow::new(5, 5, 0),
            XytRow::new(40, 10, 90),
            XytRow::new(20, 60, -90),
        ]]);
        let probe = print_of(vec![sample_rows()]);

        let result = match_prints(&template, &probe, 40, &PairTableScorer).unwrap();
        assert_eq!(result, MatchResult::NoMatch);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let table = PairTableScorer.prepare(&XytTemplate::from_rows(sample_rows()).unwrap()).unwrap();
        let gallery = XytTemplate::from_rows(rotate(&sample_rows(), -20.0, (3, 3))).unwrap();

        let first = PairTableScorer.score(&table, &gallery).unwrap();
        let second = PairTableScorer.score(&table, &gallery).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_short_circuits_on_first_match() {
        let template = print_of(vec![
            vec![XytRow::new(10, 0, 0)],
            vec![XytRow::new(50, 0, 0)],
            vec![XytRow::new(99, 0, 0)],
        ]);
        let probe = print_of(vec![vec![XytRow::new(0, 0, 0)]]);

        let scorer = ScriptedScorer::new(Some(99));
        let result = match_prints(&template, &probe, 40, &scorer).unwrap();

        assert_eq!(result, MatchResult::Match);
        assert_eq!(scorer.calls.get(), 2);
    }

    #[test]
    fn test_scorer_fault_is_match_error() {
        let template = print_of(vec![vec![XytRow::new(10, 0, 0)], vec![XytRow::new(20, 0, 0)]]);
        let probe = print_of(vec![vec![XytRow::new(0, 0, 0)]]);

        let result = match_prints(&template, &probe, 40, &ScriptedScorer::new(Some(20)));
        assert!(matches!(result, Err(Error::MatchError(_))));
    }

    #[test]
    fn test_probe_must_hold_one_template() {
        let template = print_of(vec![sample_rows()]);
        let probe = print_of(vec![sample_rows(), sample_rows()]);

        let result = match_prints(&template, &probe, 40, &PairTableScorer);
        assert!(matches!(result, Err(Error::UnsupportedInput(_))));
    }

    #[test]
    fn test_raw_prints_are_incompatible() {
        let template = Print::with_kind(1, 1, PrintKind::Raw);
        let probe = print_of(vec![sample_rows()]);

        let result = match_prints(&template, &probe, 40, &PairTableScorer);
        assert!(matches!(result, Err(Error::Incompatible(_))));
    }

    #[test]
    fn test_identify_returns_first_match() {
        let gallery = vec![
            print_of(vec![vec![XytRow::new(10, 0, 0)]]),
            print_of(vec![vec![XytRow::new(45, 0, 0)]]),
            print_of(vec![vec![XytRow::new(60, 0, 0)]]),
        ];
        let probe = print_of(vec![vec![XytRow::new(0, 0, 0)]]);

        let found = identify(&gallery, &probe, 40, &ScriptedScorer::new(None)).unwrap();
        assert_eq!(found, Some(1));

        let found = identify(&gallery[..1], &probe, 40, &ScriptedScorer::new(None)).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_extreme_rows_score_without_overflow() {
        let minutiae = [
            Minutia::new(i32::MIN, 0, i32::MIN, 1.0),
            Minutia::new(i32::MAX, 0, i32::MAX, 1.0),
            Minutia::new(i32::MAX, i32::MIN, 0, 1.0),
            Minutia::new(i32::MAX - 10, i32::MIN + 10, 7, 1.0),
        ];
        let template = minutiae_to_xyt(&minutiae, u32::MAX, u32::MAX);

        let table = PairTableScorer.prepare(&template).unwrap();
        assert!(PairTableScorer.score(&table, &template).is_ok());
    }

    #[test]
    fn test_hostile_stored_template_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(b"FP2");
        buf.put_u16_le(1);
        buf.put_u32_le(1);
        buf.put_u8(PrintKind::Minutiae.into());
        buf.put_u32_le(24);
        for value in [i32::MIN, 0, 0, i32::MAX, 0, i32::MIN] {
            buf.put_i32_le(value);
        }

        let result = crate::format::deserialize(&buf);
        assert!(matches!(result, Err(Error::CorruptData(_))));

        let probe = print_of(vec![sample_rows()]);
        let result = match_prints(&print_of(vec![sample_rows()]), &probe, 40, &PairTableScorer).unwrap();
        assert_eq!(result, MatchResult::Match);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(180), 180);
        assert_eq!(normalize(-180), 180);
        assert_eq!(normalize(190), -170);
        assert_eq!(normalize(-540), 180);
        assert_eq!(normalize(0), 0);
    }
}
