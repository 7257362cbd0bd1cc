//! Keyword intent classifier.
//!
//! Scores every intent by keyword hits against a fixed table and escalates
//! the tier from message length and conversation depth. Pure: no I/O, no
//! state, never fails.

use crate::types::{SessionFlags, ThinkingLevel, Tier};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Weight of one keyword hit.
const KEYWORD_WEIGHT: u32 = 2;

/// Bonus for code fences, brace pairs or a code-hosting URL.
const STRUCTURE_BONUS: u32 = 3;

const CODE_HOSTS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org", "gist.github"];

/// Closed set of request intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Chat,
    Code,
    Analysis,
    Search,
    Task,
    Creative,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Chat => "chat",
            Intent::Code => "code",
            Intent::Analysis => "analysis",
            Intent::Search => "search",
            Intent::Task => "task",
            Intent::Creative => "creative",
        }
    }

    pub fn profile(self) -> &'static IntentProfile {
        PROFILES
            .iter()
            .find(|p| p.intent == self)
            .unwrap_or(&CHAT_PROFILE)
    }
}

/// Static routing facts for one intent.
#[derive(Debug)]
pub struct IntentProfile {
    pub intent: Intent,
    pub base_tier: Tier,
    pub thinking: bool,
    pub max_output_tokens: u32,
    pub tools: &'static [&'static str],
    keywords: &'static [&'static str],
}

const CHAT_PROFILE: IntentProfile = IntentProfile {
    intent: Intent::Chat,
    base_tier: Tier::Simple,
    thinking: false,
    max_output_tokens: 2048,
    tools: &[],
    keywords: &[],
};

/// Intent table in tie-break order: on equal scores the earlier entry wins.
const PROFILES: &[IntentProfile] = &[
    IntentProfile {
        intent: Intent::Code,
        base_tier: Tier::Moderate,
        thinking: true,
        max_output_tokens: 8192,
        tools: &["exec", "read", "write", "edit", "web_fetch"],
        keywords: &[
            "code", "function", "bug", "debug", "refactor", "compile", "implement", "script",
            "stack trace", "traceback", "rust", "python", "javascript", "typescript", "regex",
            "코드", "함수", "버그", "디버그", "리팩토링", "구현", "컴파일",
        ],
    },
    IntentProfile {
        intent: Intent::Analysis,
        base_tier: Tier::Moderate,
        thinking: true,
        max_output_tokens: 8192,
        tools: &["read", "web_search", "web_fetch"],
        keywords: &[
            "analyze", "analyse", "analysis", "compare", "evaluate", "explain why",
            "pros and cons", "trade-off", "tradeoff", "assess", "review",
            "분석", "비교", "평가", "검토", "장단점",
        ],
    },
    IntentProfile {
        intent: Intent::Search,
        base_tier: Tier::Simple,
        thinking: false,
        max_output_tokens: 2048,
        tools: &["web_search", "web_fetch"],
        keywords: &[
            "search", "look up", "lookup", "latest", "news", "weather", "price of",
            "검색", "찾아", "최신", "뉴스", "날씨",
        ],
    },
    IntentProfile {
        intent: Intent::Task,
        base_tier: Tier::Moderate,
        thinking: false,
        max_output_tokens: 2048,
        tools: &["exec", "read", "write", "edit"],
        keywords: &[
            "schedule", "remind", "calendar", "email", "send", "create a file", "delete",
            "rename", "execute", "일정", "알림", "메일", "보내", "실행", "삭제",
        ],
    },
    IntentProfile {
        intent: Intent::Creative,
        base_tier: Tier::Simple,
        thinking: false,
        max_output_tokens: 4096,
        tools: &[],
        keywords: &[
            "story", "poem", "lyrics", "slogan", "brainstorm", "creative", "novel",
            "소설", "이야기", "가사", "아이디어",
        ],
    },
    CHAT_PROFILE,
];

/// How one keyword is found in a lowercased message.
enum KeywordMatcher {
    /// ASCII keywords match whole words only.
    Word(Regex),
    /// Hangul keywords take attached particles, so they match anywhere.
    Substring(&'static str),
}

impl KeywordMatcher {
    fn new(keyword: &'static str) -> Self {
        if keyword.is_ascii() {
            if let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(keyword))) {
                return KeywordMatcher::Word(re);
            }
        }
        KeywordMatcher::Substring(keyword)
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            KeywordMatcher::Word(re) => re.is_match(text),
            KeywordMatcher::Substring(keyword) => text.contains(keyword),
        }
    }
}

/// Matchers per entry of [`PROFILES`], same order.
static KEYWORD_MATCHERS: LazyLock<Vec<Vec<KeywordMatcher>>> = LazyLock::new(|| {
    PROFILES
        .iter()
        .map(|profile| profile.keywords.iter().copied().map(KeywordMatcher::new).collect())
        .collect()
});

/// Result of classifying one turn. Computed fresh per turn, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub tier: Tier,
    pub score: u32,
    pub thinking: bool,
    pub thinking_budget: u32,
}

impl Classification {
    pub fn max_output_tokens(&self) -> u32 {
        self.intent.profile().max_output_tokens
    }

    pub fn tools(&self) -> &'static [&'static str] {
        self.intent.profile().tools
    }

    /// Reasoning budget after session switches: disabled sessions get none,
    /// a pinned level replaces the length-derived budget.
    pub fn effective_thinking(&self, flags: &SessionFlags, budgets: &ThinkingBudgets) -> Option<u32> {
        if !flags.thinking_enabled {
            return None;
        }
        match flags.thinking_level {
            Some(level) => Some(budgets.for_level(level)),
            None if self.thinking && self.thinking_budget > 0 => Some(self.thinking_budget),
            None => None,
        }
    }
}

/// Reasoning budget bands in tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinkingBudgets {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub xhigh: u32,
}

impl Default for ThinkingBudgets {
    fn default() -> Self {
        Self {
            low: 4_000,
            medium: 10_000,
            high: 16_000,
            xhigh: 32_000,
        }
    }
}

impl ThinkingBudgets {
    pub fn for_level(&self, level: ThinkingLevel) -> u32 {
        match level {
            ThinkingLevel::Low => self.low,
            ThinkingLevel::Medium => self.medium,
            ThinkingLevel::High => self.high,
            ThinkingLevel::XHigh => self.xhigh,
        }
    }
}

/// Length and depth thresholds driving tier escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Messages longer than this (in chars) are at least moderate.
    pub short_len: usize,
    /// Messages longer than this are complex.
    pub complex_len: usize,
    /// Conversations deeper than this are complex.
    pub complex_depth: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            short_len: 80,
            complex_len: 600,
            complex_depth: 40,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, message: &str, context_depth: usize) -> Classification {
        let lower = message.to_lowercase();
        let has_fence = lower.contains("```");
        let has_braces = lower.contains('{') && lower.contains('}');
        let has_code_url = CODE_HOSTS.iter().any(|host| lower.contains(host));

        let mut best = &CHAT_PROFILE;
        let mut best_score = 0u32;
        for (profile, matchers) in PROFILES.iter().zip(KEYWORD_MATCHERS.iter()) {
            let hits = matchers.iter().filter(|m| m.is_match(&lower)).count() as u32;
            let mut score = hits * KEYWORD_WEIGHT;
            match profile.intent {
                Intent::Code if has_fence || has_braces || has_code_url => {
                    score += STRUCTURE_BONUS
                }
                Intent::Analysis if has_code_url => score += STRUCTURE_BONUS,
                _ => {}
            }
            if score > best_score {
                best = profile;
                best_score = score;
            }
        }

        let length = message.chars().count();
        let mut tier = best.base_tier;
        if length > self.config.short_len {
            tier = tier.max(Tier::Moderate);
        }
        if length > self.config.complex_len || context_depth > self.config.complex_depth {
            tier = Tier::Complex;
        }

        let thinking_budget = if best.thinking {
            auto_thinking_budget(length)
        } else {
            0
        };

        Classification {
            intent: best.intent,
            tier,
            score: best_score,
            thinking: best.thinking,
            thinking_budget,
        }
    }
}

/// Length-banded budget used when no level is pinned.
fn auto_thinking_budget(length: usize) -> u32 {
    match length {
        0..=499 => 5_000,
        500..=1_999 => 10_000,
        _ => 16_000,
    }
}
