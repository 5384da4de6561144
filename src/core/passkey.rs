//! Passkey sources for Passkey Entry pairing

use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use trait_variant::make;

use crate::config::PasskeySource;
use crate::core::error::{ProfilerError, ProfilerResult};

const MAX_PASSKEY_DIGITS: usize = 6;

/// Asks someone for the passkey shown on the peripheral
#[make(Send)]
pub trait PasskeyPrompt: Sync {
    async fn prompt(&self) -> ProfilerResult<u32>;
}

/// Parse a passkey typed by a user or read from a dictionary
pub fn parse_passkey(input: &str) -> Result<u32, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty passkey".into());
    }
    if input.len() > MAX_PASSKEY_DIGITS || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{input}' is not a number of at most 6 digits"));
    }
    input.parse().map_err(|e| format!("'{input}': {e}"))
}

/// Prompt on the terminal
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl PasskeyPrompt for StdinPrompt {
    async fn prompt(&self) -> ProfilerResult<u32> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        loop {
            stdout
                .write_all(b"Enter the 6-digit passkey shown on the device: ")
                .await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                return Err(ProfilerError::Passkey("input closed".into()));
            };
            match parse_passkey(&line) {
                Ok(passkey) => return Ok(passkey),
                Err(e) => warn!("Invalid passkey: {}", e),
            }
        }
    }
}

/// Prompt that never asks anyone
///
/// Used where a passkey must come from configuration only: restored pairings and an exhausted
/// dictionary.
#[derive(Debug, Default)]
pub struct NoPrompt;

impl PasskeyPrompt for NoPrompt {
    async fn prompt(&self) -> ProfilerResult<u32> {
        Err(ProfilerError::Passkey("no configured passkey left to try".into()))
    }
}

/// Candidate passkeys tried in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasskeyDictionary {
    entries: Vec<u32>,
    position: usize,
}

impl PasskeyDictionary {
    pub fn new(entries: Vec<u32>) -> ProfilerResult<Self> {
        if entries.is_empty() {
            return Err(ProfilerError::Config("passkey dictionary is empty".into()));
        }
        Ok(Self {
            entries,
            position: 0,
        })
    }

    /// Load one passkey per line; blank lines are skipped
    pub async fn load(path: &Path) -> ProfilerResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut entries = Vec::new();

        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let passkey = parse_passkey(line).map_err(|e| {
                ProfilerError::Config(format!("{}:{}: {}", path.display(), index + 1, e))
            })?;
            entries.push(passkey);
        }

        info!(path = %path.display(), entries = entries.len(), "Loaded passkey dictionary");
        Self::new(entries)
    }

    /// Entry to try next, or `None` once every entry was tried
    pub fn current(&self) -> Option<u32> {
        self.entries.get(self.position).copied()
    }

    /// Move to the next entry; false when the dictionary is exhausted
    pub fn advance(&mut self) -> bool {
        if self.position < self.entries.len() {
            self.position += 1;
        }
        self.position < self.entries.len()
    }
}

/// How the passkey for the next pairing attempt is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasskeyStrategy {
    Interactive,
    Fixed(u32),
    Dictionary(PasskeyDictionary),
}

impl PasskeyStrategy {
    pub async fn from_source(source: &PasskeySource) -> ProfilerResult<Self> {
        match source {
            PasskeySource::Interactive => Ok(PasskeyStrategy::Interactive),
            PasskeySource::Fixed(passkey) => {
                let passkey = parse_passkey(&passkey.to_string()).map_err(ProfilerError::Config)?;
                Ok(PasskeyStrategy::Fixed(passkey))
            }
            PasskeySource::Dictionary(path) => {
                Ok(PasskeyStrategy::Dictionary(PasskeyDictionary::load(path).await?))
            }
        }
    }

    /// Passkey known before pairing starts
    ///
    /// `None` with [`PasskeyStrategy::prompts_user`] means the user is asked if Passkey Entry
    /// is negotiated. An exhausted dictionary offers nothing and the attempt fails instead.
    pub fn preset(&self) -> Option<u32> {
        match self {
            PasskeyStrategy::Interactive => None,
            PasskeyStrategy::Fixed(passkey) => Some(*passkey),
            PasskeyStrategy::Dictionary(dictionary) => dictionary.current(),
        }
    }

    /// Only the interactive strategy may ask the user
    pub fn prompts_user(&self) -> bool {
        matches!(self, PasskeyStrategy::Interactive)
    }

    /// Whether another passkey is available after a passkey related failure
    pub fn advance(&mut self) -> bool {
        match self {
            PasskeyStrategy::Dictionary(dictionary) => {
                let more = dictionary.advance();
                debug!(next = ?dictionary.current(), "Advancing passkey dictionary");
                more
            }
            _ => false,
        }
    }
}

/// Prompt answering from a fixed list, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: tokio::sync::Mutex<std::collections::VecDeque<u32>>,
    asked: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ScriptedPrompt {
    pub fn new(answers: impl IntoIterator<Item = u32>) -> Self {
        Self {
            answers: tokio::sync::Mutex::new(answers.into_iter().collect()),
            asked: Default::default(),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl PasskeyPrompt for ScriptedPrompt {
    async fn prompt(&self) -> ProfilerResult<u32> {
        self.asked.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.answers
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ProfilerError::Passkey("no scripted answer left".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_passkey() {
        assert_eq!(parse_passkey("123456"), Ok(123456));
        assert_eq!(parse_passkey(" 000042\n"), Ok(42));
        assert_eq!(parse_passkey("0"), Ok(0));
        assert!(parse_passkey("").is_err());
        assert!(parse_passkey("1234567").is_err());
        assert!(parse_passkey("12a456").is_err());
        assert!(parse_passkey("-12345").is_err());
    }

    #[tokio::test]
    async fn test_dictionary_load_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "111111\n\n222222\n   \n333333").unwrap();

        let mut dictionary = PasskeyDictionary::load(file.path()).await.unwrap();
        assert_eq!(dictionary.current(), Some(111111));
        assert!(dictionary.advance());
        assert_eq!(dictionary.current(), Some(222222));
        assert!(dictionary.advance());
        assert_eq!(dictionary.current(), Some(333333));
        assert!(!dictionary.advance());
    }

    #[tokio::test]
    async fn test_dictionary_load_rejects_bad_entry() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "111111\nabc").unwrap();

        let error = PasskeyDictionary::load(file.path()).await.unwrap_err();
        assert!(matches!(error, ProfilerError::Config(ref msg) if msg.contains(":2:")));
    }

    #[tokio::test]
    async fn test_dictionary_load_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            PasskeyDictionary::load(file.path()).await,
            Err(ProfilerError::Config(_))
        ));
    }

    #[test]
    fn test_dictionary_advance_until_exhausted() {
        let mut dictionary = PasskeyDictionary::new(vec![1, 2]).unwrap();
        assert_eq!(dictionary.current(), Some(1));
        assert!(dictionary.advance());
        assert_eq!(dictionary.current(), Some(2));
        assert!(!dictionary.advance());
        assert_eq!(dictionary.current(), None);
        assert!(!dictionary.advance());
    }

    #[tokio::test]
    async fn test_strategy_preset() {
        let strategy = PasskeyStrategy::from_source(&PasskeySource::Fixed(654321))
            .await
            .unwrap();
        assert_eq!(strategy.preset(), Some(654321));

        assert!(
            PasskeyStrategy::from_source(&PasskeySource::Fixed(1_000_000))
                .await
                .is_err()
        );

        let mut interactive = PasskeyStrategy::Interactive;
        assert_eq!(interactive.preset(), None);
        assert!(interactive.prompts_user());
        assert!(!interactive.advance());
    }

    #[test]
    fn test_exhausted_dictionary_never_prompts() {
        let mut strategy = PasskeyStrategy::Dictionary(PasskeyDictionary::new(vec![7]).unwrap());
        assert_eq!(strategy.preset(), Some(7));
        assert!(!strategy.prompts_user());

        assert!(!strategy.advance());
        assert_eq!(strategy.preset(), None);
        assert!(!strategy.prompts_user());
    }

    #[tokio::test]
    async fn test_no_prompt_refuses() {
        assert!(matches!(
            NoPrompt.prompt().await,
            Err(ProfilerError::Passkey(_))
        ));
    }

    #[tokio::test]
    async fn test_scripted_prompt() {
        let prompt = ScriptedPrompt::new([5]);
        assert_eq!(prompt.prompt().await.unwrap(), 5);
        assert!(prompt.prompt().await.is_err());
        assert_eq!(prompt.asked(), 2);
    }
}
