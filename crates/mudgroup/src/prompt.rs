//! Reading the local character's state out of game text.
//!
//! The game reports exact numbers only in the `score` output. The prompt
//! shows words ("Fine", "Hot", "Tired") that each stand for a band of the
//! maximum, so between scores the numbers are nudged into the band the
//! prompt names.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use mudgroup_protocol::{CharacterAffect, CharacterPosition};
use regex::Regex;

/// `123/130 hits, 90/100 mana, and 140/141 moves.` (mana is optional).
const SCORE_PATTERN: &str =
    r"^(\d+)/(\d+) hits,?(?: (\d+)/(\d+) mana,)? and (\d+)/(\d+) moves.";

/// The MUME prompt, e.g. `*# HP:Fine Mana:Hot Move:Tired Orc:Bad>`.
///
/// Groups: 1 light and terrain, 2 weather and flags, 3 HP, 4 Mana,
/// 5 Move, 6 Mount, 7/8 target and its health, 9/10 buffer and health.
const PROMPT_PATTERN: &str = concat!(
    r"^([*@!)o][\[#.f(<%~WU+:=O]?)",
    r#"([~'"]?[-=]? ?[Cc]?[Rr]?[Ss]?W?(?: i[^ >]+)?(?: NN)?(?: NS)?(?: \d+\[\d+:\d+\])?)?"#,
    r"(?: HP:([^ >]+))?",
    r"(?: Mana:([^ >]+))?",
    r"(?: Move:([^ >]+))?",
    r"(?: Mount:([^ >]+))?",
    r"(?: ([^>:]+):([^ >]+))?",
    r"(?: ([^>:]+):([^ >]+))?",
    r">",
);

const TARGET_GROUP: usize = 7;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Exact numbers from the `score` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Score {
    pub hp: i32,
    pub maxhp: i32,
    pub mana: i32,
    pub maxmana: i32,
    pub moves: i32,
    pub maxmoves: i32,
}

/// The words a prompt showed. An absent word means "full".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Prompt {
    pub hp: String,
    pub mana: String,
    pub moves: String,
    /// A target was shown, so the character is fighting.
    pub in_combat: bool,
}

/// Compiled score and prompt patterns.
#[derive(Debug, Clone)]
pub struct StatusParser {
    score: Regex,
    prompt: Regex,
}

impl StatusParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            score: Regex::new(SCORE_PATTERN)?,
            prompt: Regex::new(PROMPT_PATTERN)?,
        })
    }

    pub fn parse_score(&self, line: &str) -> Option<Score> {
        let caps = self.score.captures(line)?;
        let number = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<i32>().ok())
                .unwrap_or(0)
        };
        Some(Score {
            hp: number(1),
            maxhp: number(2),
            mana: number(3),
            maxmana: number(4),
            moves: number(5),
            maxmoves: number(6),
        })
    }

    pub fn parse_prompt(&self, line: &str) -> Option<Prompt> {
        let caps = self.prompt.captures(line)?;
        let word = |i: usize| caps.get(i).map_or_else(String::new, |m| m.as_str().to_string());
        Some(Prompt {
            hp: word(3),
            mana: word(4),
            moves: word(5),
            in_combat: caps.get(TARGET_GROUP).is_some_and(|m| !m.as_str().is_empty()),
        })
    }
}

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

impl Prompt {
    /// The position implied by this prompt, given the previous one.
    ///
    /// Dying beats fighting. Leaving combat means standing again, unless
    /// the character died.
    pub fn position_after(&self, last: &Prompt, current: CharacterPosition) -> CharacterPosition {
        if self.hp == "Dying" || current == CharacterPosition::Incapacitated {
            CharacterPosition::Incapacitated
        } else if self.in_combat {
            CharacterPosition::Fighting
        } else if current != CharacterPosition::Dead && last.in_combat {
            CharacterPosition::Standing
        } else {
            current
        }
    }
}

fn band(current: f64, max: f64, lower: f64, upper: f64) -> f64 {
    let ub = max * upper;
    let lb = max * lower;
    if current >= ub {
        ub
    } else if current <= lb {
        lb
    } else {
        current
    }
}

pub fn estimate_hp(word: &str, current: i32, max: i32) -> i32 {
    let (current, max) = (f64::from(current), f64::from(max));
    let estimate = match word {
        "" | "Healthy" => max,
        "Fine" => band(current, max, 0.71, 0.99),
        "Hurt" => band(current, max, 0.46, 0.70),
        "Wounded" => band(current, max, 0.26, 0.45),
        "Bad" => band(current, max, 0.11, 0.25),
        "Awful" => band(current, max, 0.01, 0.10),
        _ => 0.0,
    };
    estimate as i32
}

pub fn estimate_mana(word: &str, current: i32, max: i32) -> i32 {
    let (current, max) = (f64::from(current), f64::from(max));
    let estimate = match word {
        "" => max,
        "Burning" => band(current, max, 0.76, 0.99),
        "Hot" => band(current, max, 0.46, 0.75),
        "Warm" => band(current, max, 0.26, 0.45),
        "Cold" => band(current, max, 0.11, 0.25),
        "Icy" => band(current, max, 0.01, 0.10),
        _ => 0.0,
    };
    estimate as i32
}

pub fn estimate_moves(word: &str, current: i32, max: i32) -> i32 {
    let (current, max) = (f64::from(current), f64::from(max));
    let estimate = match word {
        // No word only says "not tired yet".
        "" => current.max(max * 0.43),
        "Tired" => band(current, max, 0.32, 0.42),
        "Slow" => band(current, max, 0.13, 0.31),
        "Weak" => band(current, max, 0.06, 0.12),
        "Fainting" => band(current, max, 0.01, 0.05),
        _ => 0.0,
    };
    estimate as i32
}

// ---------------------------------------------------------------------------
// Affect timeouts
// ---------------------------------------------------------------------------

/// How long an affect is assumed to last after it was last reported.
pub fn affect_timeout(affect: CharacterAffect) -> Duration {
    match affect {
        CharacterAffect::Bashed => Duration::from_secs(4),
        CharacterAffect::Blind | CharacterAffect::Slept => Duration::from_secs(30 * 60),
        CharacterAffect::Poisoned => Duration::from_secs(5 * 60),
        CharacterAffect::Bleeding | CharacterAffect::Hungry | CharacterAffect::Thirsty => {
            Duration::from_secs(2 * 60)
        }
    }
}

/// When each active affect was last reported.
#[derive(Debug, Clone, Default)]
pub struct AffectTimers {
    last_seen: BTreeMap<CharacterAffect, Instant>,
}

impl AffectTimers {
    pub fn seen(&mut self, affect: CharacterAffect, at: Instant) {
        self.last_seen.insert(affect, at);
    }

    pub fn forget(&mut self, affect: CharacterAffect) {
        self.last_seen.remove(&affect);
    }

    pub fn clear(&mut self) {
        self.last_seen.clear();
    }

    /// Removes and returns every affect whose timeout has passed at `now`.
    pub fn take_expired(&mut self, now: Instant) -> Vec<CharacterAffect> {
        let expired: Vec<_> = self
            .last_seen
            .iter()
            .filter(|(affect, seen)| now.saturating_duration_since(**seen) > affect_timeout(**affect))
            .map(|(affect, _)| *affect)
            .collect();
        for affect in &expired {
            self.last_seen.remove(affect);
        }
        expired
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> StatusParser {
        StatusParser::new().expect("patterns compile")
    }

    #[test]
    fn test_parse_score_with_mana() {
        let score = parser()
            .parse_score("123/130 hits, 90/100 mana, and 140/141 moves.")
            .unwrap();
        assert_eq!(
            score,
            Score {
                hp: 123,
                maxhp: 130,
                mana: 90,
                maxmana: 100,
                moves: 140,
                maxmoves: 141,
            }
        );
    }

    #[test]
    fn test_parse_score_without_mana_zeroes_it() {
        let score = parser().parse_score("50/60 hits and 80/90 moves.").unwrap();
        assert_eq!((score.hp, score.maxhp), (50, 60));
        assert_eq!((score.mana, score.maxmana), (0, 0));
        assert_eq!((score.moves, score.maxmoves), (80, 90));
    }

    #[test]
    fn test_parse_score_other_text_is_none() {
        assert_eq!(parser().parse_score("You are hungry."), None);
    }

    #[test]
    fn test_parse_prompt_reads_words() {
        let prompt = parser().parse_prompt("*# HP:Fine Mana:Hot Move:Tired>").unwrap();
        assert_eq!(prompt.hp, "Fine");
        assert_eq!(prompt.mana, "Hot");
        assert_eq!(prompt.moves, "Tired");
        assert!(!prompt.in_combat);
    }

    #[test]
    fn test_parse_prompt_target_means_combat() {
        let prompt = parser().parse_prompt("o HP:Hurt Orc:Bad>").unwrap();
        assert_eq!(prompt.hp, "Hurt");
        assert!(prompt.in_combat);
    }

    #[test]
    fn test_parse_prompt_bare_is_all_full() {
        let prompt = parser().parse_prompt("*>").unwrap();
        assert_eq!(prompt, Prompt::default());
    }

    #[test]
    fn test_parse_prompt_not_a_prompt_is_none() {
        assert_eq!(parser().parse_prompt("Gandalf tells you 'hi'"), None);
    }

    #[test]
    fn test_estimate_hp_clamps_into_band() {
        assert_eq!(estimate_hp("", 10, 100), 100);
        assert_eq!(estimate_hp("Healthy", 10, 100), 100);
        assert_eq!(estimate_hp("Fine", 100, 100), 99);
        assert_eq!(estimate_hp("Fine", 50, 100), 71);
        assert_eq!(estimate_hp("Hurt", 60, 100), 60);
        assert_eq!(estimate_hp("Dying", 60, 100), 0);
    }

    #[test]
    fn test_estimate_mana_bands() {
        assert_eq!(estimate_mana("", 3, 200), 200);
        assert_eq!(estimate_mana("Icy", 100, 200), 20);
        assert_eq!(estimate_mana("Frozen", 100, 200), 0);
    }

    #[test]
    fn test_estimate_moves_no_word_only_raises() {
        assert_eq!(estimate_moves("", 10, 100), 43);
        assert_eq!(estimate_moves("", 90, 100), 90);
        assert_eq!(estimate_moves("Slow", 90, 100), 31);
    }

    #[test]
    fn test_position_after_dying_beats_fighting() {
        let dying = Prompt {
            hp: "Dying".into(),
            in_combat: true,
            ..Prompt::default()
        };
        assert_eq!(
            dying.position_after(&Prompt::default(), CharacterPosition::Fighting),
            CharacterPosition::Incapacitated
        );
    }

    #[test]
    fn test_position_after_combat_ends_standing_unless_dead() {
        let fighting = Prompt {
            in_combat: true,
            ..Prompt::default()
        };
        let calm = Prompt::default();
        assert_eq!(
            calm.position_after(&fighting, CharacterPosition::Fighting),
            CharacterPosition::Standing
        );
        assert_eq!(
            calm.position_after(&fighting, CharacterPosition::Dead),
            CharacterPosition::Dead
        );
        assert_eq!(
            calm.position_after(&calm, CharacterPosition::Resting),
            CharacterPosition::Resting
        );
    }

    #[test]
    fn test_take_expired_uses_per_affect_timeout() {
        let start = Instant::now();
        let mut timers = AffectTimers::default();
        timers.seen(CharacterAffect::Bashed, start);
        timers.seen(CharacterAffect::Poisoned, start);

        assert!(timers.take_expired(start + Duration::from_secs(4)).is_empty());
        assert_eq!(
            timers.take_expired(start + Duration::from_secs(5)),
            vec![CharacterAffect::Bashed]
        );
        assert_eq!(
            timers.take_expired(start + Duration::from_secs(301)),
            vec![CharacterAffect::Poisoned]
        );
        assert!(timers.is_empty());
    }
}
