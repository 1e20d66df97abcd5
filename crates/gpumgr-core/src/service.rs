//! Service kinds, capacity profiles and priorities

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Workloads that compete for the GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    /// LLM inference server (Ollama)
    #[serde(rename = "ollama")]
    InferenceServer,
    /// Node-based image generation (ComfyUI)
    #[serde(rename = "comfyui")]
    ImageGeneration,
    /// Legacy image generation UI (AUTOMATIC1111)
    #[serde(rename = "automatic1111")]
    LegacyImageGeneration,
    /// Speech-to-text (Whisper)
    #[serde(rename = "whisper")]
    SpeechToText,
    /// Video generation pipelines
    #[serde(rename = "video_gen")]
    VideoGeneration,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::InferenceServer,
        ServiceKind::ImageGeneration,
        ServiceKind::LegacyImageGeneration,
        ServiceKind::SpeechToText,
        ServiceKind::VideoGeneration,
    ];

    /// Wire name used in requests, allocation ids and metrics
    pub const fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::InferenceServer => "ollama",
            ServiceKind::ImageGeneration => "comfyui",
            ServiceKind::LegacyImageGeneration => "automatic1111",
            ServiceKind::SpeechToText => "whisper",
            ServiceKind::VideoGeneration => "video_gen",
        }
    }

    /// VRAM bounds for this kind of workload
    pub const fn profile(&self) -> CapacityProfile {
        match self {
            ServiceKind::InferenceServer => CapacityProfile::new(2000, 8000, 24000),
            ServiceKind::ImageGeneration => CapacityProfile::new(4000, 10000, 24000),
            ServiceKind::LegacyImageGeneration => CapacityProfile::new(4000, 8000, 16000),
            ServiceKind::SpeechToText => CapacityProfile::new(1500, 3000, 6000),
            ServiceKind::VideoGeneration => CapacityProfile::new(12000, 20000, 24000),
        }
    }

    /// Health endpoint probed when no override is configured
    pub const fn default_health_endpoint(&self) -> Option<&'static str> {
        match self {
            ServiceKind::InferenceServer => Some("http://localhost:11434/api/tags"),
            ServiceKind::ImageGeneration => Some("http://localhost:8188/system_stats"),
            ServiceKind::LegacyImageGeneration => Some("http://localhost:7860/sdapi/v1/progress"),
            ServiceKind::SpeechToText => Some("http://localhost:9000/health"),
            ServiceKind::VideoGeneration => None,
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = crate::GpuMgrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::GpuMgrError::Config(format!("Unknown service kind: {}", s)))
    }
}

/// Static VRAM bounds for a service kind, in MB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityProfile {
    pub min_mb: u64,
    pub default_mb: u64,
    pub max_mb: u64,
}

impl CapacityProfile {
    pub const fn new(min_mb: u64, default_mb: u64, max_mb: u64) -> Self {
        Self {
            min_mb,
            default_mb,
            max_mb,
        }
    }
}

/// Scheduling precedence. Lower level wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "PriorityRepr", into = "u8")]
pub enum Priority {
    /// System and health-check work
    Critical = 0,
    /// Interactive inference
    High = 1,
    /// Standard generation
    Normal = 2,
    /// Background tasks
    Low = 3,
    /// Bulk processing
    Batch = 4,
}

impl Priority {
    pub const fn level(&self) -> u8 {
        *self as u8
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
            Priority::Batch => "BATCH",
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Priority::Critical),
            1 => Some(Priority::High),
            2 => Some(Priority::Normal),
            3 => Some(Priority::Low),
            4 => Some(Priority::Batch),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = crate::GpuMgrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(level) = s.parse::<u8>() {
            return Priority::from_level(level)
                .ok_or_else(|| crate::GpuMgrError::Config(format!("Invalid priority level: {}", s)));
        }
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Priority::Critical),
            "HIGH" => Ok(Priority::High),
            "NORMAL" => Ok(Priority::Normal),
            "LOW" => Ok(Priority::Low),
            "BATCH" => Ok(Priority::Batch),
            _ => Err(crate::GpuMgrError::Config(format!("Unknown priority: {}", s))),
        }
    }
}

/// Wire form of a priority: either its level or its name
#[derive(Deserialize)]
#[serde(untagged)]
enum PriorityRepr {
    Level(u8),
    Name(String),
}

impl TryFrom<PriorityRepr> for Priority {
    type Error = String;

    fn try_from(repr: PriorityRepr) -> Result<Self, Self::Error> {
        match repr {
            PriorityRepr::Level(level) => {
                Priority::from_level(level).ok_or_else(|| format!("invalid priority level {}", level))
            }
            PriorityRepr::Name(name) => name.parse().map_err(|e: crate::GpuMgrError| e.to_string()),
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_are_ordered() {
        for kind in ServiceKind::ALL {
            let p = kind.profile();
            assert!(p.min_mb <= p.default_mb && p.default_mb <= p.max_mb, "{}", kind);
        }
    }

    #[test]
    fn test_service_kind_wire_names() {
        let kind: ServiceKind = serde_json::from_str("\"comfyui\"").unwrap();
        assert_eq!(kind, ServiceKind::ImageGeneration);
        assert_eq!(
            serde_json::to_string(&ServiceKind::VideoGeneration).unwrap(),
            "\"video_gen\""
        );
        assert!(serde_json::from_str::<ServiceKind>("\"stable-cascade\"").is_err());
        assert_eq!("Whisper".parse::<ServiceKind>().unwrap(), ServiceKind::SpeechToText);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Low < Priority::Batch);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_priority_accepts_level_or_name() {
        let p: Priority = serde_json::from_str("1").unwrap();
        assert_eq!(p, Priority::High);
        let p: Priority = serde_json::from_str("\"batch\"").unwrap();
        assert_eq!(p, Priority::Batch);
        assert!(serde_json::from_str::<Priority>("7").is_err());
        assert_eq!(serde_json::to_string(&Priority::Low).unwrap(), "3");
    }

    #[test]
    fn test_video_generation_has_no_health_endpoint() {
        assert!(ServiceKind::VideoGeneration.default_health_endpoint().is_none());
        assert!(ServiceKind::InferenceServer.default_health_endpoint().is_some());
    }
}
