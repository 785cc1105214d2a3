//! BM25 term scoring over the passage corpus

use std::collections::HashMap;

pub const DEFAULT_K1: f32 = 1.5;
pub const DEFAULT_B: f32 = 0.75;

fn is_hangul_syllable(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || is_hangul_syllable(c)
}

/// Runs of ASCII alphanumerics and Hangul syllables, lowercased
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !is_token_char(c))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Inverted index with BM25 scoring
#[derive(Debug, Clone)]
pub struct Bm25Index {
    postings: HashMap<String, Vec<(usize, u32)>>,
    doc_lengths: Vec<u32>,
    avg_doc_length: f32,
    k1: f32,
    b: f32,
}

impl Bm25Index {
    /// Index documents; a document's position is its id in scores
    pub fn build<'a, I>(documents: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::build_with_params(documents, DEFAULT_K1, DEFAULT_B)
    }

    pub fn build_with_params<'a, I>(documents: I, k1: f32, b: f32) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut postings: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        let mut doc_lengths = Vec::new();

        for (doc, text) in documents.into_iter().enumerate() {
            let tokens = tokenize(text);
            doc_lengths.push(tokens.len() as u32);

            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for (term, count) in tf {
                postings.entry(term).or_default().push((doc, count));
            }
        }

        let total: u64 = doc_lengths.iter().map(|&l| u64::from(l)).sum();
        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            total as f32 / doc_lengths.len() as f32
        };

        Self {
            postings,
            doc_lengths,
            avg_doc_length,
            k1,
            b,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    fn idf(&self, doc_freq: usize) -> f32 {
        let n = self.len() as f32;
        let df = doc_freq as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score every document containing at least one query term
    ///
    /// Returns `(doc, score)` pairs with positive scores, highest first.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<(usize, f32)> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();

        let mut scores: HashMap<usize, f32> = HashMap::new();
        for term in &terms {
            let Some(posting) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(posting.len());
            for &(doc, tf) in posting {
                let tf = tf as f32;
                let len_norm = if self.avg_doc_length > 0.0 {
                    self.doc_lengths[doc] as f32 / self.avg_doc_length
                } else {
                    0.0
                };
                let denom = tf + self.k1 * (1.0 - self.b + self.b * len_norm);
                *scores.entry(doc).or_insert(0.0) += idf * tf * (self.k1 + 1.0) / denom;
            }
        }

        let mut ranked: Vec<(usize, f32)> = scores.into_iter().filter(|(_, s)| *s > 0.0).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}

/// Map an unbounded BM25 score into [0, 1); `saturation` maps to 0.5
#[must_use]
pub fn normalize_score(score: f32, saturation: f32) -> f32 {
    if score <= 0.0 {
        0.0
    } else {
        score / (score + saturation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_mixed_script() {
        assert_eq!(
            tokenize("요즘 ADHD 약을 먹어요, 2주째!"),
            vec!["요즘", "adhd", "약을", "먹어요", "2주째"]
        );
        assert!(tokenize("...!?").is_empty());
    }

    #[test]
    fn test_bm25_prefers_matching_and_rarer_terms() {
        let docs = [
            "불안 때문에 잠을 못 자요",
            "직장 스트레스가 심해요",
            "불안 불안 불안 계속 불안해요",
            "가족 문제로 힘들어요",
        ];
        let index = Bm25Index::build(docs.iter().copied());
        let ranked = index.search("불안 잠을");

        assert_eq!(ranked[0].0, 0);
        assert!(ranked.iter().all(|(doc, _)| *doc == 0 || *doc == 2));
    }

    #[test]
    fn test_bm25_no_match() {
        let index = Bm25Index::build(["하나", "둘"].into_iter());
        assert!(index.search("셋").is_empty());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_normalize_score() {
        assert_eq!(normalize_score(0.0, 5.0), 0.0);
        assert!((normalize_score(5.0, 5.0) - 0.5).abs() < 1e-6);
        assert!(normalize_score(1000.0, 5.0) < 1.0);
    }
}
