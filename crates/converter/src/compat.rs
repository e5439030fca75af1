use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// One size/duration limit combination under a named service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTier {
    pub tier: String,
    /// Maximum upload size in bytes
    pub max_size: u64,
    /// Maximum duration in seconds, when the tier has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<f64>,
}

/// A named third-party service and its ordered tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceLimit {
    pub name: String,
    #[serde(default)]
    pub limits: Vec<ServiceTier>,
}

/// Verdict for a single tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCompatibility {
    pub tier: String,
    pub size_exceeded: bool,
    pub duration_exceeded: bool,
}

impl TierCompatibility {
    pub fn is_compatible(&self) -> bool {
        !self.size_exceeded && !self.duration_exceeded
    }

    /// Short reason text for rendering, `None` when the tier accepts the file
    pub fn reason(&self) -> Option<&'static str> {
        match (self.size_exceeded, self.duration_exceeded) {
            (true, true) => Some("too large and too long"),
            (true, false) => Some("too large"),
            (false, true) => Some("too long"),
            (false, false) => None,
        }
    }
}

/// Verdict for a whole service: compatible if any tier accepts the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceCompatibility {
    pub name: String,
    pub compatible: bool,
    pub tiers: Vec<TierCompatibility>,
}

/// Evaluates an estimated output against the static service table
#[derive(Debug, Clone)]
pub struct CompatibilityChecker {
    services: Vec<ServiceLimit>,
}

impl CompatibilityChecker {
    pub fn new(services: Vec<ServiceLimit>) -> Self {
        CompatibilityChecker { services }
    }

    pub fn services(&self) -> &[ServiceLimit] {
        &self.services
    }

    /// Check `size_bytes` and `duration_secs` against every service.
    ///
    /// Services without any tier are skipped, so an empty or malformed table
    /// produces an empty result.
    pub fn check(&self, size_bytes: u64, duration_secs: f64) -> Vec<ServiceCompatibility> {
        self.services
            .iter()
            .filter(|service| !service.name.is_empty() && !service.limits.is_empty())
            .map(|service| {
                let tiers: Vec<TierCompatibility> = service
                    .limits
                    .iter()
                    .map(|limit| TierCompatibility {
                        tier: limit.tier.clone(),
                        size_exceeded: size_bytes > limit.max_size,
                        duration_exceeded: limit
                            .max_duration
                            .map(|max| duration_secs > max)
                            .unwrap_or(false),
                    })
                    .collect();

                ServiceCompatibility {
                    name: service.name.clone(),
                    compatible: tiers.iter().any(TierCompatibility::is_compatible),
                    tiers,
                }
            })
            .collect()
    }
}

impl Default for CompatibilityChecker {
    fn default() -> Self {
        Self::new(default_service_limits())
    }
}

fn tier(name: &str, max_size: u64, max_duration: Option<f64>) -> ServiceTier {
    ServiceTier {
        tier: name.to_string(),
        max_size,
        max_duration,
    }
}

/// Built-in upload limits, used when the configuration does not supply a table
pub fn default_service_limits() -> Vec<ServiceLimit> {
    vec![
        ServiceLimit {
            name: "Discord".to_string(),
            limits: vec![
                tier("Free", 10 * MIB, None),
                tier("Nitro Basic", 50 * MIB, None),
                tier("Nitro", 500 * MIB, None),
            ],
        },
        ServiceLimit {
            name: "X (Twitter)".to_string(),
            limits: vec![
                tier("Standard", 512 * MIB, Some(140.0)),
                tier("Premium", 8 * GIB, Some(4.0 * 3600.0)),
            ],
        },
        ServiceLimit {
            name: "WhatsApp".to_string(),
            limits: vec![
                tier("Media", 16 * MIB, None),
                tier("Document", 2 * GIB, None),
            ],
        },
        ServiceLimit {
            name: "Telegram".to_string(),
            limits: vec![
                tier("Free", 2 * GIB, None),
                tier("Premium", 4 * GIB, None),
            ],
        },
        ServiceLimit {
            name: "Slack".to_string(),
            limits: vec![tier("Upload", GIB, None)],
        },
        ServiceLimit {
            name: "Email".to_string(),
            limits: vec![tier("Attachment", 25 * MIB, None)],
        },
        ServiceLimit {
            name: "YouTube".to_string(),
            limits: vec![
                tier("Unverified", 256 * GIB, Some(15.0 * 60.0)),
                tier("Verified", 256 * GIB, Some(12.0 * 3600.0)),
            ],
        },
    ]
}
