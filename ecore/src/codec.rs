use base64::alphabet::Alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD};
use base64::Engine;
use thiserror::Error;

// The viewer obfuscates by base64 encoding then substituting each symbol of the standard
// alphabet with the symbol at the same position in a key. That is exactly base64 with a
// custom alphabet, so the key string is used as the alphabet directly.
const DESCRIPTOR_ALPHABET: &str =
    "PJLKMNOI3xyz021wvrpqstouHCFBDEGAnhikjlmgfZbacedYRXTSUVQW!56789+4";
const CHUNK_ALPHABET: &str = "PJKLMNOI3xyz012wvprqstuoHBCDEFGAnhijklmgfZabcdeYXRSTUVWQ!56789+4";

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("token is not valid under this key: {0}")]
    Alphabet(#[from] base64::DecodeError),
    #[error("decoded token is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// A fixed substitution key over the 64 base64 symbol positions.
pub struct ObfuscationKey {
    engine: GeneralPurpose,
}

/// Key used for the descriptor payload and the page id list inside it.
pub const DESCRIPTOR: ObfuscationKey = ObfuscationKey::new(DESCRIPTOR_ALPHABET);

/// Key used to derive remote chunk names.
pub const CHUNK: ObfuscationKey = ObfuscationKey::new(CHUNK_ALPHABET);

impl ObfuscationKey {
    const fn new(key: &str) -> Self {
        let alphabet = match Alphabet::new(key) {
            Ok(alphabet) => alphabet,
            Err(_) => panic!("obfuscation key is not a valid base64 alphabet"),
        };

        ObfuscationKey {
            engine: GeneralPurpose::new(&alphabet, PAD),
        }
    }

    pub fn encode(&self, plaintext: &str) -> String {
        self.engine.encode(plaintext.as_bytes())
    }

    pub fn decode(&self, token: &str) -> Result<String, CodecError> {
        let raw = self.engine.decode(token.trim())?;
        Ok(String::from_utf8(raw)?)
    }
}

pub fn encode(plaintext: &str, key: &ObfuscationKey) -> String {
    key.encode(plaintext)
}

pub fn decode(token: &str, key: &ObfuscationKey) -> Result<String, CodecError> {
    key.decode(token)
}
