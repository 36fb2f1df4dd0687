use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokenizers::normalizers::replace::{Replace, ReplacePattern};
use tokenizers::normalizers::Lowercase;
use tokenizers::pre_tokenizers::split::{Split, SplitPattern};
use tokenizers::{
    NormalizedString, Normalizer, OffsetReferential, OffsetType, PreTokenizedString, PreTokenizer,
    SplitDelimiterBehavior,
};

pub const PAD_ID: u32 = 0;
pub const OOV_ID: u32 = 1;

/// Characters stripped out of the text before splitting into words.
const FILTERS: &str = r##"[!"#$%&()*+,\-./:;<=>?@\[\\\]^_`{|}~\t\n]"##;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizerConfig {
    /// Upper bound on emitted ids, padding and OOV included.
    pub num_words: usize,
    pub seq_len: usize,
    pub oov_token: String,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            num_words: 5000,
            seq_len: 1000,
            oov_token: "<OOV>".to_string(),
        }
    }
}

/// Serializable form of a fitted vectorizer. `words[k]` has id `k + 2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizerState {
    pub config: VectorizerConfig,
    pub words: Vec<String>,
}

/// Word-level vocabulary with a reserved padding id (0) and OOV id (1),
/// producing fixed-length id sequences.
pub struct TextVectorizer {
    config: VectorizerConfig,
    words: Vec<String>,
    index: HashMap<String, u32>,
    lowercase: Lowercase,
    filters: Replace,
    pre_tokenizer: Split,
}

impl TextVectorizer {
    pub fn new(config: VectorizerConfig) -> anyhow::Result<Self> {
        let filters = Replace::new(ReplacePattern::Regex(FILTERS.to_string()), " ")
            .map_err(anyhow::Error::msg)?;
        // words break on a plain space only, other whitespace stays inside them
        let pre_tokenizer = Split::new(
            SplitPattern::String(" ".to_string()),
            SplitDelimiterBehavior::Removed,
            false,
        )
        .map_err(anyhow::Error::msg)?;
        Ok(Self {
            config,
            words: Vec::new(),
            index: HashMap::new(),
            lowercase: Lowercase,
            filters,
            pre_tokenizer,
        })
    }

    pub fn from_state(state: VectorizerState) -> anyhow::Result<Self> {
        let mut vectorizer = Self::new(state.config)?;
        vectorizer.set_words(state.words);
        Ok(vectorizer)
    }

    pub fn state(&self) -> VectorizerState {
        VectorizerState {
            config: self.config.clone(),
            words: self.words.clone(),
        }
    }

    pub fn seq_len(&self) -> usize {
        self.config.seq_len
    }

    /// Number of distinct ids this vectorizer can emit.
    pub fn vocab_size(&self) -> usize {
        self.words.len() + 2
    }

    fn set_words(&mut self, words: Vec<String>) {
        self.index = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as u32 + 2))
            .collect();
        self.words = words;
    }

    /// Lowercases, turns punctuation, tabs and newlines into spaces and
    /// splits on spaces.
    pub fn split_words(&self, text: &str) -> anyhow::Result<Vec<String>> {
        let mut normalized = NormalizedString::from(text);
        self.lowercase
            .normalize(&mut normalized)
            .map_err(anyhow::Error::msg)?;
        self.filters
            .normalize(&mut normalized)
            .map_err(anyhow::Error::msg)?;

        let mut pretokenized = PreTokenizedString::from(normalized);
        self.pre_tokenizer
            .pre_tokenize(&mut pretokenized)
            .map_err(anyhow::Error::msg)?;
        Ok(pretokenized
            .get_splits(OffsetReferential::Normalized, OffsetType::Byte)
            .into_iter()
            .map(|(word, _, _)| word.to_string())
            .collect())
    }

    /// Ranks words by corpus frequency, ties broken by first occurrence, and
    /// keeps the `num_words - 2` most frequent. Replaces any previous fit.
    pub fn fit<'a, I>(&mut self, texts: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        // word -> (count, first seen)
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        for text in texts {
            for word in self.split_words(text)? {
                let next = counts.len();
                counts.entry(word).or_insert((0, next)).0 += 1;
            }
        }

        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|(_, (ca, fa)), (_, (cb, fb))| cb.cmp(ca).then(fa.cmp(fb)));
        let total = ranked.len();
        ranked.truncate(self.config.num_words.saturating_sub(2));
        self.set_words(ranked.into_iter().map(|(w, _)| w).collect());

        tracing::info!(
            distinct_words = total,
            kept = self.words.len(),
            oov_token = %self.config.oov_token,
            "fitted vocabulary"
        );
        Ok(())
    }

    /// Maps words to ids without padding; unknown words become [`OOV_ID`].
    pub fn text_to_ids(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        Ok(self
            .split_words(text)?
            .iter()
            .map(|w| self.index.get(w).copied().unwrap_or(OOV_ID))
            .collect())
    }

    /// Ids right-truncated or right-padded with [`PAD_ID`] to `seq_len`.
    pub fn vectorize(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        let mut ids = self.text_to_ids(text)?;
        ids.resize(self.config.seq_len, PAD_ID);
        Ok(ids)
    }

    pub fn vectorize_all<'a, I>(&self, texts: I) -> anyhow::Result<Vec<Vec<u32>>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        texts.into_iter().map(|t| self.vectorize(t)).collect()
    }
}
