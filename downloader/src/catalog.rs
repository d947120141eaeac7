//! Quality keys and the yt-dlp format expressions they stand for.

use serde::Serialize;

use crate::{Error, Result};

/// Quality key that defers to a user supplied format expression.
pub const CUSTOM_KEY: &str = "custom";
pub const DEFAULT_KEY: &str = "best";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tier {
    BestAvailable,
    ResolutionCapped(u32),
    CodecPreferred,
    AudioOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quality {
    pub key: &'static str,
    pub label: &'static str,
    pub expression: &'static str,
    pub tier: Tier,
}

const QUALITIES: &[Quality] = &[
    Quality {
        key: "best",
        label: "Best Quality (4K/1440p/1080p)",
        expression: "bv*+ba/b",
        tier: Tier::BestAvailable,
    },
    Quality {
        key: "1080p",
        label: "High Quality (1080p max)",
        expression: "bv*[height<=1080]+ba/b[height<=1080]",
        tier: Tier::ResolutionCapped(1080),
    },
    Quality {
        key: "720p",
        label: "Medium Quality (720p max)",
        expression: "bv*[height<=720]+ba/b[height<=720]",
        tier: Tier::ResolutionCapped(720),
    },
    Quality {
        key: "480p",
        label: "Low Quality (480p max)",
        expression: "bv*[height<=480]+ba/b[height<=480]",
        tier: Tier::ResolutionCapped(480),
    },
    Quality {
        key: "vp9",
        label: "Premium Quality (VP9+Opus)",
        expression: "bv*[vcodec^=vp9]+ba[acodec^=opus]/bv*+ba/b",
        tier: Tier::CodecPreferred,
    },
    Quality {
        key: "av1",
        label: "Ultra Quality (AV1+Opus)",
        expression: "bv*[vcodec^=av01]+ba[acodec^=opus]/bv*+ba/b",
        tier: Tier::CodecPreferred,
    },
    Quality {
        key: "audio",
        label: "Audio Only (Best)",
        expression: "ba[ext=m4a]/ba[ext=mp3]/ba/b",
        tier: Tier::AudioOnly,
    },
];

/// All known qualities, in the order a picker should show them.
pub fn entries() -> &'static [Quality] {
    QUALITIES
}

/// Looks up a quality by key (case-insensitive) or by its exact label.
pub fn lookup(key: &str) -> Option<&'static Quality> {
    let key = key.trim();
    QUALITIES
        .iter()
        .find(|q| q.key.eq_ignore_ascii_case(key) || q.label == key)
}

/// Resolves a quality key to the format expression handed to the extractor.
pub fn resolve(key: &str) -> Result<&'static str> {
    lookup(key)
        .map(|q| q.expression)
        .ok_or_else(|| Error::UnknownQuality(key.to_owned()))
}
