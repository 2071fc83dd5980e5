use serde::{Deserialize, Serialize};

/// The config-layer payload of a manifest (spec §3). Authored at `create`,
/// read at `load` and `show`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_family: String,
    #[serde(default)]
    pub model_families: Vec<String>,
    pub model_type: String,
    pub file_type: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub renderer: Option<String>,
    #[serde(default)]
    pub parser: Option<String>,
    #[serde(default)]
    pub requires: Option<String>,
    #[serde(default)]
    pub remote_host: Option<String>,
    #[serde(default)]
    pub remote_model: Option<String>,
    #[serde(default)]
    pub root_fs: RootFs,
    #[serde(default)]
    pub context_len: u64,
    #[serde(default)]
    pub embed_len: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(default)]
    pub diff_ids: Vec<String>,
}

/// A model capability; requests that require one a loaded runner lacks fail
/// with a capability error (spec §4.1 step 4, §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Completion,
    Tools,
    Insert,
    Vision,
    Embedding,
    Thinking,
    Image,
}

impl ModelConfig {
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }
}

/// GGML metadata exposed by the metadata oracle (spec §3). Forge never
/// parses GGUF/safetensors itself; it only consumes this interface.
pub trait GgmlMetadata: Send + Sync {
    fn architecture(&self) -> &str;
    fn file_type(&self) -> &str;
    fn parameter_count(&self) -> u64;
    fn block_count(&self) -> u64;
    fn vision_block_count(&self) -> u64;
    fn context_length(&self) -> u64;
    fn bos_token_id(&self) -> Option<u32>;
    fn eos_token_id(&self) -> Option<u32>;
    fn add_bos_token(&self) -> bool;
    fn add_eos_token(&self) -> bool;

    fn has_vision_encoder(&self) -> bool {
        self.vision_block_count() > 0
    }
}

/// A static, in-memory [`GgmlMetadata`] implementation for tests and for
/// metadata already parsed by an external oracle process.
#[derive(Clone, Debug, Default)]
pub struct StaticGgmlMetadata {
    pub architecture: String,
    pub file_type: String,
    pub parameter_count: u64,
    pub block_count: u64,
    pub vision_block_count: u64,
    pub context_length: u64,
    pub bos_token_id: Option<u32>,
    pub eos_token_id: Option<u32>,
    pub add_bos_token: bool,
    pub add_eos_token: bool,
}

impl GgmlMetadata for StaticGgmlMetadata {
    fn architecture(&self) -> &str {
        &self.architecture
    }
    fn file_type(&self) -> &str {
        &self.file_type
    }
    fn parameter_count(&self) -> u64 {
        self.parameter_count
    }
    fn block_count(&self) -> u64 {
        self.block_count
    }
    fn vision_block_count(&self) -> u64 {
        self.vision_block_count
    }
    fn context_length(&self) -> u64 {
        self.context_length
    }
    fn bos_token_id(&self) -> Option<u32> {
        self.bos_token_id
    }
    fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }
    fn add_bos_token(&self) -> bool {
        self.add_bos_token
    }
    fn add_eos_token(&self) -> bool {
        self.add_eos_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_capability_checks_membership() {
        let mut cfg = ModelConfig::default();
        cfg.capabilities.push(Capability::Vision);
        assert!(cfg.has_capability(Capability::Vision));
        assert!(!cfg.has_capability(Capability::Tools));
    }

    #[test]
    fn vision_encoder_detected_from_block_count() {
        let mut meta = StaticGgmlMetadata::default();
        assert!(!meta.has_vision_encoder());
        meta.vision_block_count = 4;
        assert!(meta.has_vision_encoder());
    }
}
