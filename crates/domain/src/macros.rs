//! Display/FromStr generation for label enums
//!
//! Statuses, target kinds and error kinds all double as metric labels and
//! config values, so they share one lowercase string mapping.
//!
//! ```rust
//! use stratasync_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Phase {
//!     Queued,
//!     Running,
//! }
//!
//! impl_domain_status_conversions!(Phase {
//!     Queued => "queued",
//!     Running => "running",
//! });
//!
//! assert_eq!(Phase::Running.to_string(), "running");
//! assert_eq!("QUEUED".parse::<Phase>(), Ok(Phase::Queued));
//! ```

/// Implements `Display`, `FromStr` and an `as_str` accessor for a label enum
///
/// Parsing is case-insensitive; output is always the given string.
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Stable lowercase label
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
