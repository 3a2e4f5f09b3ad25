//! Encoder output slots and decoder input resolution.
//!
//! Decoders name their inputs after encoder outputs (`emb`, `e3`, `c0`, ...).
//! Those names are resolved to [`EncoderSlot`]s once, when the model is
//! loaded, so the hop path only indexes a table.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Environment switch for the default [`SlotPolicy`].
pub const ALLOW_DEFAULT_OUTPUT_ENV: &str = "DFN_ALLOW_DEFAULT_OUTPUT";

static ENV_SLOT_POLICY: Lazy<SlotPolicy> = Lazy::new(|| {
    SlotPolicy::from_env_value(std::env::var(ALLOW_DEFAULT_OUTPUT_ENV).ok().as_deref())
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderSlot {
    E0,
    E1,
    E2,
    E3,
    Emb,
    C0,
    Lsnr,
}

impl EncoderSlot {
    pub const ALL: [EncoderSlot; 7] = [
        EncoderSlot::E0,
        EncoderSlot::E1,
        EncoderSlot::E2,
        EncoderSlot::E3,
        EncoderSlot::Emb,
        EncoderSlot::C0,
        EncoderSlot::Lsnr,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "e0" => Some(EncoderSlot::E0),
            "e1" => Some(EncoderSlot::E1),
            "e2" => Some(EncoderSlot::E2),
            "e3" => Some(EncoderSlot::E3),
            "emb" => Some(EncoderSlot::Emb),
            "c0" => Some(EncoderSlot::C0),
            "lsnr" => Some(EncoderSlot::Lsnr),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EncoderSlot::E0 => "e0",
            EncoderSlot::E1 => "e1",
            EncoderSlot::E2 => "e2",
            EncoderSlot::E3 => "e3",
            EncoderSlot::Emb => "emb",
            EncoderSlot::C0 => "c0",
            EncoderSlot::Lsnr => "lsnr",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// What to do when a decoder asks for an encoder output we do not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotPolicy {
    /// Fail every hop that would need the unknown input.
    #[default]
    Strict,
    /// Feed `emb` instead.
    Lenient,
}

impl SlotPolicy {
    /// Policy from `DFN_ALLOW_DEFAULT_OUTPUT`, read once per process.
    pub fn from_env() -> Self {
        *ENV_SLOT_POLICY
    }

    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => SlotPolicy::Strict,
            Some(v) => {
                let v = v.to_ascii_lowercase();
                if matches!(v.as_str(), "0" | "false" | "no" | "off") {
                    SlotPolicy::Strict
                } else {
                    SlotPolicy::Lenient
                }
            }
        }
    }
}

/// Decoder input name -> encoder slot, or the name that failed to resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotBinding {
    pub input: String,
    pub slot: Result<EncoderSlot, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotTable {
    bindings: Vec<SlotBinding>,
}

impl SlotTable {
    /// Resolves `inputs` (as declared by a decoder). `stage` names the
    /// decoder in the one-time warning.
    pub fn resolve(stage: &str, inputs: &[String], policy: SlotPolicy) -> Self {
        let bindings = inputs
            .iter()
            .map(|name| {
                let slot = match EncoderSlot::from_name(name) {
                    Some(slot) => Ok(slot),
                    None => match policy {
                        SlotPolicy::Lenient => {
                            log::warn!(
                                "Unknown encoder output '{}' requested by {}; defaulting to 'emb'",
                                name,
                                stage
                            );
                            Ok(EncoderSlot::Emb)
                        }
                        SlotPolicy::Strict => {
                            log::warn!(
                                "Unknown encoder output '{}' requested by {}; hops will fail (set {}=1 to default to 'emb')",
                                name,
                                stage,
                                ALLOW_DEFAULT_OUTPUT_ENV
                            );
                            Err(name.clone())
                        }
                    },
                };
                SlotBinding {
                    input: name.clone(),
                    slot,
                }
            })
            .collect();
        Self { bindings }
    }

    pub fn bindings(&self) -> &[SlotBinding] {
        &self.bindings
    }

    pub fn is_complete(&self) -> bool {
        self.bindings.iter().all(|b| b.slot.is_ok())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
