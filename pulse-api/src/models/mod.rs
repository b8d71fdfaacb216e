//! Domain models for the marketplace
//!
//! Status enums are stored in SQLite as lowercase snake_case TEXT and
//! serialized the same way over the API.

pub mod message;
pub mod order;
pub mod payment;
pub mod profile;
pub mod slot;
pub mod taxonomy;
pub mod user;

pub use message::{Conversation, Message};
pub use order::{
    transition_actors, ChoiceStatus, CustomerChoice, Order, OrderStatus, Participant, Priority,
    StatusChange,
};
pub use payment::{EscrowStatus, Payment, PaymentStatus, Payout, PayoutStatus};
pub use profile::{ConsultantProfile, Rating};
pub use slot::{Slot, SlotStatus};
pub use taxonomy::{SapModule, ServiceType};
pub use user::{AuthUser, Role, User};

/// Implements `as_str`, `FromStr` and `Display` for a fieldless enum stored as TEXT
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = pulse_common::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(pulse_common::Error::InvalidInput(format!(
                        "Unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
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

pub(crate) use text_enum;
