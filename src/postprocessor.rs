use serde::{Deserialize, Serialize};
use tracing::info;

use crate::decoder::{DecoderEngine, ProcessorKind};

/// Upper bound on ranked candidates per utterance.
pub const CANDIDATE_MAX: usize = 5;
/// Upper bound on words per candidate.
pub const CANDIDATE_WORD_MAX: usize = 50;

const START_MARKER: &str = "<s>";
const END_MARKER: &str = "</s>";
const SILENCE_MARKER: &str = "<sil>";

/// One recognized word with its frame range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub start: i32,
    pub end: i32,
}

/// One ranked candidate word sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub quality: f64,
    pub words: Vec<Word>,
}

/// Finalized utterance result handed to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub id: String,
    pub quality: f64,
    /// Utterance length in samples.
    pub length: i32,
    /// Candidates in strictly decreasing quality order, duplicates collapsed.
    pub cands: Vec<Candidate>,
}

/// Turn the engine's lattice/N-best output into a ranked utterance result.
/// `frame_len` converts decoder frame units to samples.
pub fn process_utterance(
    kind: ProcessorKind,
    engine: &dyn DecoderEngine,
    frame_len: usize,
) -> Utterance {
    match kind {
        ProcessorKind::Acoustic => acoustic_processor(engine, frame_len),
        ProcessorKind::Fsg => fsg_processor(engine, frame_len),
    }
}

/// Free-form path: walk the N-best list, extracting the word sequence
/// between the sentence markers of each alternative and scoring it against
/// the global best hypothesis.
fn acoustic_processor(engine: &dyn DecoderEngine, frame_len: usize) -> Utterance {
    let (id, best_score) = match engine.hypothesis() {
        Some(hyp) => (
            hyp.id.unwrap_or_else(|| "<unknown>".to_string()),
            hyp.score,
        ),
        None => ("<unknown>".to_string(), 0),
    };

    let mut best_prob = engine.exp_score(best_score);
    if best_prob < 1e-8 {
        best_prob = 1e-8;
    }

    let mut cands: Vec<Candidate> = Vec::new();
    let mut length_frames = 0i32;

    for nb in engine.nbest(CANDIDATE_MAX - 1) {
        // Skip leading junk until the start-of-sentence marker.
        let mut segs = nb.segments.iter();
        if !segs.any(|seg| seg.word == START_MARKER) {
            continue;
        }

        let mut cand = Candidate {
            quality: engine.exp_score(nb.score) / best_prob,
            words: Vec::new(),
        };
        let mut closed = false;
        length_frames = 0;

        for seg in segs {
            if seg.word == END_MARKER || cand.words.len() >= CANDIDATE_WORD_MAX {
                length_frames = seg.end_frame;
                closed = true;
                break;
            } else if seg.word == SILENCE_MARKER {
                continue;
            }
            cand.words.push(Word {
                word: seg.word.clone(),
                start: seg.start_frame,
                end: seg.end_frame,
            });
        }

        if cand.words.is_empty() {
            continue;
        }
        if !closed {
            // Ran out of segments without an explicit end of sentence.
            cand.quality *= 0.9;
        }
        if length_frames == 0 {
            length_frames = cand.words.last().map(|w| w.end).unwrap_or(0);
        }

        cands.push(cand);
    }

    Utterance {
        id,
        quality: best_prob,
        length: length_frames.saturating_mul(frame_len as i32),
        cands: candidate_sort(cands),
    }
}

/// Grammar path: take a single path through the lattice, skipping bracketed
/// marker nodes and collapsing consecutive duplicate words.
fn fsg_processor(engine: &dyn DecoderEngine, frame_len: usize) -> Utterance {
    let (id, score) = match engine.hypothesis() {
        Some(hyp) => (
            hyp.id.unwrap_or_else(|| "<unknown>".to_string()),
            hyp.score,
        ),
        None => ("<unknown>".to_string(), 0),
    };
    let prob = engine.exp_score(score);

    let mut cand = Candidate {
        quality: 1.0,
        words: Vec::new(),
    };
    let mut n_frames = 0i32;

    if let Some(dag) = engine.lattice() {
        n_frames = dag.n_frames;

        'edges: for (i, edge) in dag.edges.iter().enumerate() {
            if i == 0 && is_word(&edge.src.word) {
                cand.words.push(Word {
                    word: edge.src.word.clone(),
                    start: edge.src.start_frame,
                    end: (edge.src.first_exit_frame + edge.src.last_exit_frame) / 2,
                });
            }

            let node = &edge.dst;
            if !is_word(&node.word) {
                continue;
            }

            if let Some(prev) = cand.words.last() {
                if node.start_frame < prev.end {
                    // The lattice branched; keep the one path taken so far.
                    break 'edges;
                }
                if wdeq(&node.word, &prev.word) {
                    continue;
                }
            }

            cand.words.push(Word {
                word: node.word.clone(),
                start: node.start_frame,
                end: node.first_exit_frame,
            });
        }
    }

    Utterance {
        id,
        quality: prob.max(1e-5),
        length: n_frames.saturating_mul(frame_len as i32),
        cands: vec![cand],
    }
}

fn is_word(text: &str) -> bool {
    !text.is_empty() && !text.starts_with('<')
}

/// Rank candidates by quality, collapsing duplicates under [`wdeq`] to the
/// better-scoring one.
fn candidate_sort(raw: Vec<Candidate>) -> Vec<Candidate> {
    let mut sorted: Vec<Candidate> = Vec::with_capacity(raw.len().min(CANDIDATE_MAX));

    for cand in raw {
        if cand.words.is_empty() {
            continue;
        }

        if let Some(pos) = sorted.iter().position(|s| candidates_equal(&cand, s)) {
            if cand.quality <= sorted[pos].quality {
                continue;
            }
            sorted.remove(pos);
        }

        let insert_at = sorted
            .iter()
            .position(|s| cand.quality > s.quality)
            .unwrap_or(sorted.len());
        sorted.insert(insert_at, cand);
    }

    sorted
}

fn candidates_equal(a: &Candidate, b: &Candidate) -> bool {
    a.words.len() == b.words.len()
        && a.words
            .iter()
            .zip(&b.words)
            .all(|(aw, bw)| wdeq(&aw.word, &bw.word))
}

/// Word equality that treats a `(` as a pronunciation-variant suffix marker,
/// so `color` matches `color(2)`.
pub fn wdeq(wd1: &str, wd2: &str) -> bool {
    if wd1 == wd2 {
        return true;
    }

    let (b1, b2) = (wd1.as_bytes(), wd2.as_bytes());
    match (b1.first(), b2.first()) {
        (Some(c1), Some(c2)) if c1 == c2 => {}
        _ => return false,
    }

    let l1 = wd1.find('(').unwrap_or(0);
    let l2 = wd2.find('(').unwrap_or(0);

    if l1 > 0 && l1 == l2 {
        return b1[..l1] == b2[..l1];
    }
    if l1 > 0 && l2 == 0 {
        return b2.len() >= l1 && b1[..l1] == b2[..l1];
    }
    if l1 == 0 && l2 > 0 {
        return b1.len() >= l2 && b1[..l2] == b2[..l2];
    }

    false
}

/// Log the ranked result of a finalized utterance.
pub fn log_utterance(utt: &Utterance) {
    info!(
        "*** {:>15}  ({:.4}) {} candidates, length {}",
        utt.id,
        utt.quality,
        utt.cands.len(),
        utt.length
    );
    for cand in &utt.cands {
        info!("  ({:.4}) ----------------------", cand.quality);
        for wd in &cand.words {
            info!("           {} - {}  {}", wd.start, wd.end, wd.word);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(quality: f64, words: &[&str]) -> Candidate {
        Candidate {
            quality,
            words: words
                .iter()
                .enumerate()
                .map(|(i, w)| Word {
                    word: w.to_string(),
                    start: i as i32 * 10,
                    end: i as i32 * 10 + 9,
                })
                .collect(),
        }
    }

    #[test]
    fn test_wdeq_exact_and_variant() {
        assert!(wdeq("color", "color"));
        assert!(wdeq("color", "color(2)"));
        assert!(wdeq("color(2)", "color"));
        assert!(wdeq("color(2)", "color(3)"));
        assert!(!wdeq("color", "colour"));
        assert!(!wdeq("color", "dolor(2)"));
        assert!(!wdeq("", "color"));
    }

    #[test]
    fn test_wdeq_symmetry() {
        let words = ["color", "color(2)", "colour", "co", "color(12)"];
        for a in &words {
            for b in &words {
                assert_eq!(wdeq(a, b), wdeq(b, a), "wdeq asymmetric for {a} / {b}");
            }
        }
    }

    #[test]
    fn test_sort_orders_by_quality() {
        let sorted = candidate_sort(vec![
            cand(0.3, &["alpha"]),
            cand(0.9, &["beta"]),
            cand(0.5, &["gamma"]),
        ]);
        let qualities: Vec<f64> = sorted.iter().map(|c| c.quality).collect();
        assert_eq!(qualities, vec![0.9, 0.5, 0.3]);
    }

    #[test]
    fn test_sort_collapses_duplicates_keeping_best() {
        let sorted = candidate_sort(vec![
            cand(0.6, &["play", "music"]),
            cand(0.8, &["play", "music"]),
        ]);
        assert_eq!(sorted.len(), 1);
        assert_eq!(sorted[0].quality, 0.8);
    }

    #[test]
    fn test_sort_collapses_variant_duplicates() {
        let sorted = candidate_sort(vec![
            cand(0.9, &["stop"]),
            cand(0.6, &["play", "music(2)"]),
            cand(0.8, &["play", "music"]),
        ]);
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].words[0].word, "stop");
        assert_eq!(sorted[1].quality, 0.8);
    }

    #[test]
    fn test_sort_no_equal_pairs_in_output() {
        let sorted = candidate_sort(vec![
            cand(0.2, &["a"]),
            cand(0.95, &["a(2)"]),
            cand(0.5, &["b"]),
            cand(0.4, &["a"]),
        ]);
        for i in 0..sorted.len() {
            for j in i + 1..sorted.len() {
                assert!(!candidates_equal(&sorted[i], &sorted[j]));
            }
            if i + 1 < sorted.len() {
                assert!(sorted[i].quality >= sorted[i + 1].quality);
            }
        }
    }

    #[test]
    fn test_sort_drops_empty_candidates() {
        let sorted = candidate_sort(vec![cand(0.9, &[]), cand(0.5, &["a"])]);
        assert_eq!(sorted.len(), 1);
        assert_eq!(sorted[0].words[0].word, "a");
    }
}
