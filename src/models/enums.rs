use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Role {
    Doctor => "doctor",
    Technician => "technician",
});

str_enum!(RetrainTrigger {
    Scheduled => "scheduled",
    Manual => "manual",
});

str_enum!(RunStatus {
    Succeeded => "succeeded",
    NoNewData => "no_new_data",
    Failed => "failed",
});

// ═══════════════════════════════════════════
// Condition (classifier label set)
// ═══════════════════════════════════════════

/// Retinal condition predicted from an OCT scan.
///
/// `Unknown` is the gate's output when confidence falls below the threshold.
/// It is never a training label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Condition {
    ChoroidalNeovascularization,
    DiabeticMacularEdema,
    Drusen,
    Normal,
    Unknown,
}

impl Condition {
    /// The trainable label set, in canonical artifact order.
    pub const TRAINABLE: [Condition; 4] = [
        Condition::ChoroidalNeovascularization,
        Condition::DiabeticMacularEdema,
        Condition::Drusen,
        Condition::Normal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChoroidalNeovascularization => "Choroidal Neovascularization",
            Self::DiabeticMacularEdema => "Diabetic Macular Edema",
            Self::Drusen => "Drusen",
            Self::Normal => "Normal",
            Self::Unknown => "Unknown",
        }
    }

    /// Short code used by scanners and older clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ChoroidalNeovascularization => "CNV",
            Self::DiabeticMacularEdema => "DME",
            Self::Drusen => "DRUSEN",
            Self::Normal => "NORMAL",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is_trainable(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl std::str::FromStr for Condition {
    type Err = DatabaseError;

    /// Accepts display names case-insensitively, and short codes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        [
            Self::ChoroidalNeovascularization,
            Self::DiabeticMacularEdema,
            Self::Drusen,
            Self::Normal,
            Self::Unknown,
        ]
        .into_iter()
        .find(|c| {
            c.as_str().eq_ignore_ascii_case(trimmed) || c.code().eq_ignore_ascii_case(trimmed)
        })
        .ok_or_else(|| DatabaseError::InvalidEnum {
            field: "Condition".into(),
            value: s.into(),
        })
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Condition {
    type Error = DatabaseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Condition> for String {
    fn from(value: Condition) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_round_trip() {
        for (variant, s) in [(Role::Doctor, "doctor"), (Role::Technician, "technician")] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(Role::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn run_status_round_trip() {
        for (variant, s) in [
            (RunStatus::Succeeded, "succeeded"),
            (RunStatus::NoNewData, "no_new_data"),
            (RunStatus::Failed, "failed"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(RunStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn invalid_enum_returns_error() {
        let result = RetrainTrigger::from_str("hourly");
        assert!(matches!(
            result,
            Err(DatabaseError::InvalidEnum { .. })
        ));
    }

    #[test]
    fn condition_parses_names_and_codes() {
        assert_eq!(
            Condition::from_str("Choroidal Neovascularization").unwrap(),
            Condition::ChoroidalNeovascularization
        );
        assert_eq!(
            Condition::from_str("diabetic macular edema").unwrap(),
            Condition::DiabeticMacularEdema
        );
        assert_eq!(Condition::from_str("CNV").unwrap(), Condition::ChoroidalNeovascularization);
        assert_eq!(Condition::from_str("drusen").unwrap(), Condition::Drusen);
        assert_eq!(Condition::from_str(" NORMAL ").unwrap(), Condition::Normal);
        assert!(Condition::from_str("Glaucoma").is_err());
    }

    #[test]
    fn unknown_is_not_trainable() {
        assert!(!Condition::Unknown.is_trainable());
        assert!(Condition::TRAINABLE.iter().all(|c| c.is_trainable()));
    }

    #[test]
    fn condition_serializes_as_display_name() {
        let json = serde_json::to_string(&Condition::DiabeticMacularEdema).unwrap();
        assert_eq!(json, "\"Diabetic Macular Edema\"");
        let back: Condition = serde_json::from_str("\"DME\"").unwrap();
        assert_eq!(back, Condition::DiabeticMacularEdema);
        assert!(serde_json::from_str::<Condition>("\"Cataract\"").is_err());
    }
}
