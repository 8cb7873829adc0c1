// The harmonizer: builds the full constraint model for one progression and
// runs searches over it.
//
// Model building is a straight pipeline over a fresh `Space`:
// voicing network → harmonic rules → voice-leading rules → cost model →
// lexicographic objective. The finished space is kept as a root and cloned
// for every search, so one `Harmonizer` can answer several queries (best,
// first, enumerate, improve on a known bound) without rebuilding.
//
// Every assignment the engine returns is re-verified against the network
// links before it is turned into a `Voicing`. A failed check surfaces as
// `HarmonyError::ModelDefect`.
//
// Alternatives: branch and bound yields a strictly improving stream, so the
// incumbents superseded along the way are valid but costlier voicings. The
// last `max_alternatives` of them are kept, best first.

use std::fmt::Write as _;

use chorale_search::{Assignment, SearchOptions, SearchStats, SolveMode, Space, solve};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::HarmonyConfig;
use crate::cost::{CostModel, CostVector};
use crate::error::HarmonyError;
use crate::harmonic::HarmonicConstraintSet;
use crate::network::{Voice, VoicingNetwork};
use crate::progression::{HarmonizationRequest, Progression, ResolvedChord};
use crate::tonality::{Tonality, note_name};
use crate::voice_leading::VoiceLeadingConstraintSet;

/// Four MIDI notes per chord, bass first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voicing {
    pub chords: Vec<[i32; 4]>,
}

impl Voicing {
    pub fn len(&self) -> usize {
        self.chords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chords.is_empty()
    }

    pub fn note(&self, voice: Voice, i: usize) -> i32 {
        self.chords[i][voice.index()]
    }

    /// The melody sung by one voice.
    pub fn voice_line(&self, voice: Voice) -> Vec<i32> {
        self.chords.iter().map(|c| c[voice.index()]).collect()
    }

    /// One line per voice, soprano on top, note names per chord.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for voice in Voice::ALL.iter().rev() {
            let _ = write!(out, "{:<8}", voice.name());
            for note in self.voice_line(*voice) {
                let _ = write!(out, " {:<4}", note_name(note));
            }
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredVoicing {
    pub voicing: Voicing,
    pub cost: CostVector,
}

#[derive(Debug, Clone)]
pub struct Harmonization {
    pub voicing: Voicing,
    pub cost: CostVector,
    /// False when the time budget ran out before the search tree was
    /// exhausted.
    pub proven_optimal: bool,
    /// Earlier incumbents, best first.
    pub alternatives: Vec<ScoredVoicing>,
    pub stats: SearchStats,
}

pub struct Harmonizer {
    root: Space,
    network: VoicingNetwork,
    harmonic: HarmonicConstraintSet,
    voice_leading: VoiceLeadingConstraintSet,
    cost: CostModel,
    chords: Vec<ResolvedChord>,
    config: HarmonyConfig,
}

impl Harmonizer {
    pub fn new(
        key: &Tonality,
        progression: &Progression,
        config: HarmonyConfig,
    ) -> Result<Self, HarmonyError> {
        config.validate()?;
        let chords = progression.resolve(key)?;

        let mut root = Space::new();
        let network = VoicingNetwork::build(&mut root, chords.len(), key, &config.ranges)?;
        let harmonic =
            HarmonicConstraintSet::post(&mut root, &network, &chords, key, config.root_doubling);
        let voice_leading = VoiceLeadingConstraintSet::post(&mut root, &network, &chords, key);
        let cost = CostModel::post(&mut root, &network, &chords, &harmonic);
        root.minimize_lex(cost.objective());

        info!(
            key = %key,
            chords = chords.len(),
            vars = root.num_vars(),
            propagators = root.num_propagators(),
            "harmonization model built"
        );
        Ok(Harmonizer {
            root,
            network,
            harmonic,
            voice_leading,
            cost,
            chords,
            config,
        })
    }

    pub fn chords(&self) -> &[ResolvedChord] {
        &self.chords
    }

    pub fn config(&self) -> &HarmonyConfig {
        &self.config
    }

    pub fn harmonic_rules(&self) -> &HarmonicConstraintSet {
        &self.harmonic
    }

    pub fn voice_leading_rules(&self) -> &VoiceLeadingConstraintSet {
        &self.voice_leading
    }

    /// The lowest-cost voicing found within the time budget.
    pub fn best(&self) -> Result<Harmonization, HarmonyError> {
        self.branch_and_bound(self.config.search.options())?
            .ok_or(HarmonyError::InfeasibleProgression)
    }

    /// The best voicing strictly cheaper than `bound`, or `None` if the
    /// search proves there is none.
    pub fn improve_on(&self, bound: &CostVector) -> Result<Option<Harmonization>, HarmonyError> {
        let options = SearchOptions {
            initial_bound: Some(bound.as_slice().to_vec()),
            ..self.config.search.options()
        };
        self.branch_and_bound(options)
    }

    /// Any valid voicing, ignoring cost.
    pub fn first(&self) -> Result<ScoredVoicing, HarmonyError> {
        let mut solutions = solve(
            self.root.clone(),
            SolveMode::FirstSolution,
            self.config.search.options(),
        )?;
        match solutions.next() {
            Some(solution) => self.read(&solution.assignment),
            None if solutions.timed_out() => Err(self.timeout()),
            None => Err(HarmonyError::InfeasibleProgression),
        }
    }

    /// Up to `max` valid voicings in search order. An empty result means the
    /// progression is infeasible; running out of time before the first
    /// voicing is `HarmonyError::Timeout`.
    pub fn all(&self, max: usize) -> Result<Vec<ScoredVoicing>, HarmonyError> {
        let mut solutions = solve(
            self.root.clone(),
            SolveMode::AllSolutions,
            self.config.search.options(),
        )?;
        let found = solutions
            .by_ref()
            .take(max)
            .map(|s| self.read(&s.assignment))
            .collect::<Result<Vec<_>, _>>()?;
        if solutions.timed_out() {
            if found.is_empty() {
                return Err(self.timeout());
            }
            warn!(found = found.len(), "enumeration stopped by the time budget");
        }
        info!(found = found.len(), "enumeration finished");
        Ok(found)
    }

    fn branch_and_bound(&self, options: SearchOptions) -> Result<Option<Harmonization>, HarmonyError> {
        let keep = self.config.max_alternatives;
        let mut solutions = solve(self.root.clone(), SolveMode::BestByLexCost, options)?;
        let mut best: Option<ScoredVoicing> = None;
        let mut alternatives: Vec<ScoredVoicing> = Vec::new();

        for solution in solutions.by_ref() {
            let scored = self.read(&solution.assignment)?;
            debug!(
                cost = %scored.cost,
                nodes = solution.stats.nodes,
                "improving solution"
            );
            if let Some(previous) = best.replace(scored) {
                alternatives.insert(0, previous);
                alternatives.truncate(keep);
            }
        }

        let stats = solutions.stats();
        let proven_optimal = solutions.exhausted();
        let Some(best) = best else {
            if solutions.timed_out() {
                return Err(self.timeout());
            }
            info!(nodes = stats.nodes, "no voicing satisfies the rules");
            return Ok(None);
        };

        info!(
            cost = %best.cost,
            proven_optimal,
            nodes = stats.nodes,
            failures = stats.failures,
            solutions = stats.solutions,
            elapsed_ms = stats.elapsed_ms,
            "harmonization finished"
        );
        Ok(Some(Harmonization {
            voicing: best.voicing,
            cost: best.cost,
            proven_optimal,
            alternatives,
            stats,
        }))
    }

    fn read(&self, assignment: &Assignment) -> Result<ScoredVoicing, HarmonyError> {
        self.network.verify(assignment)?;
        let chords = (0..self.network.len())
            .map(|i| {
                let notes = assignment.values_of(&self.network.chord_notes(i));
                [notes[0], notes[1], notes[2], notes[3]]
            })
            .collect();
        Ok(ScoredVoicing {
            voicing: Voicing { chords },
            cost: self.cost.read(assignment),
        })
    }

    fn timeout(&self) -> HarmonyError {
        HarmonyError::Timeout {
            budget_ms: self.config.search.timeout_ms.unwrap_or(0),
        }
    }
}

/// Build and solve in one call.
pub fn harmonize(
    request: &HarmonizationRequest,
    config: HarmonyConfig,
) -> Result<Harmonization, HarmonyError> {
    let key = request.tonality()?;
    Harmonizer::new(&key, &request.progression(), config)?.best()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tonality::Mode;

    fn harmonizer(tokens: &[&str]) -> Harmonizer {
        with_config(tokens, HarmonyConfig::default())
    }

    fn with_config(tokens: &[&str], config: HarmonyConfig) -> Harmonizer {
        let key = Tonality::new(0, Mode::Major).unwrap();
        let progression = Progression::parse(tokens).unwrap();
        Harmonizer::new(&key, &progression, config).unwrap()
    }

    #[test]
    fn test_best_is_proven_optimal() {
        let h = harmonizer(&["0:0", "4:0", "0:0"]);
        let result = h.best().unwrap();
        assert!(result.proven_optimal);
        assert_eq!(result.voicing.len(), 3);
        for alt in &result.alternatives {
            assert!(result.cost < alt.cost);
        }
        assert!(result.alternatives.len() <= 3);
    }

    #[test]
    fn test_optimum_cannot_be_improved() {
        let h = harmonizer(&["0:0", "3:0", "0:0"]);
        let best = h.best().unwrap();
        assert!(h.improve_on(&best.cost).unwrap().is_none());
    }

    #[test]
    fn test_first_and_all_agree_with_rules() {
        let h = harmonizer(&["4:0", "0:0"]);
        let first = h.first().unwrap();
        let all = h.all(5).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0], first);
    }

    #[test]
    fn test_exhausted_budget_without_voicing_is_timeout() {
        let mut config = HarmonyConfig::default();
        config.search.timeout_ms = Some(0);
        let h = with_config(&["0:0", "3:0", "4:0", "0:0"], config);
        assert!(matches!(h.best(), Err(HarmonyError::Timeout { budget_ms: 0 })));
        assert!(matches!(h.first(), Err(HarmonyError::Timeout { budget_ms: 0 })));
        assert!(matches!(h.all(5), Err(HarmonyError::Timeout { budget_ms: 0 })));
        let bound = CostVector([9, 9, 9, 999, 9]);
        assert!(matches!(h.improve_on(&bound), Err(HarmonyError::Timeout { .. })));
    }

    #[test]
    fn test_summary_lists_voices() {
        let voicing = Voicing {
            chords: vec![[48, 55, 64, 72], [43, 55, 62, 71]],
        };
        let summary = voicing.summary();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("soprano"));
        assert!(lines[0].contains("C5"));
        assert!(lines[3].contains("G2"));
        assert_eq!(voicing.voice_line(Voice::Alto), vec![64, 62]);
    }

    #[test]
    fn test_harmonize_request() {
        let json = r#"{ "tonic": 7, "mode": "major",
            "chords": [ { "degree": 0, "state": "fundamental" },
                        { "degree": 4, "state": "fundamental" },
                        { "degree": 0, "state": "fundamental" } ] }"#;
        let request = HarmonizationRequest::from_json(json).unwrap();
        let result = harmonize(&request, HarmonyConfig::default()).unwrap();
        // G major: the first chord's bass is a G.
        assert_eq!(result.voicing.note(Voice::Bass, 0).rem_euclid(12), 7);
    }
}
