//! BPE tokenizer matching the configured OpenAI model.

use anyhow::{anyhow, Result};
use tiktoken_rs::CoreBPE;

use nerdsiq_core::chunk::Tokenizer;

pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    /// Load the encoding used by `model`, falling back to `cl100k_base`
    /// for models tiktoken does not know.
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => {
                tracing::warn!(model, "unknown tokenizer model, using cl100k_base");
                tiktoken_rs::cl100k_base()
                    .map_err(|e| anyhow!("Failed to load cl100k_base: {}", e))?
            }
        };
        Ok(Self { bpe })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_with_special_tokens(text)
    }

    /// Window edges can split a multi-byte character; the broken bytes
    /// decode to U+FFFD instead of failing the document.
    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = self
            .bpe
            ._decode_native_and_split(tokens.to_vec())
            .flatten()
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nerdsiq_core::chunk::chunk_text;

    #[test]
    fn test_encode_decode() {
        let tokenizer = TiktokenTokenizer::for_model("gpt-4o-mini").unwrap();
        let tokens = tokenizer.encode("The return policy is 30 days.");
        assert!(!tokens.is_empty());
        assert_eq!(
            tokenizer.decode(&tokens).unwrap(),
            "The return policy is 30 days."
        );
    }

    #[test]
    fn test_short_document_is_one_chunk() {
        let tokenizer = TiktokenTokenizer::for_model("gpt-4o-mini").unwrap();
        let text = "Store hours are 9 to 5 on weekdays.";
        assert_eq!(chunk_text(&tokenizer, text, 500, 50).unwrap(), vec![text]);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        assert!(TiktokenTokenizer::for_model("not-a-model").is_ok());
    }
}
