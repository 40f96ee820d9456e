use parking_lot::Mutex;

use crate::event::Event;

/// Word frequencies harvested from in-scope events. Safe to absorb into from
/// many tasks at once.
#[derive(Default)]
pub struct WordCloud {
    words: Mutex<ahash::AHashMap<String, u64>>,
}

impl WordCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb_event(&self, event: &Event) {
        let text = event.host().unwrap_or_else(|| event.value());
        self.absorb_text(text);
    }

    pub fn absorb_text(&self, text: &str) {
        let mut words = self.words.lock();
        for word in text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| w.len() > 2 && !w.chars().all(|c| c.is_ascii_digit()))
        {
            *words.entry(word.to_ascii_lowercase()).or_insert(0) += 1;
        }
    }

    pub fn count(&self, word: &str) -> u64 {
        self.words.lock().get(word).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.words.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.lock().is_empty()
    }

    /// The `n` most frequent words, most frequent first.
    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        let mut all: Vec<(String, u64)> = self.words.lock().iter().map(|(w, c)| (w.clone(), *c)).collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        all.truncate(n);
        all
    }
}
