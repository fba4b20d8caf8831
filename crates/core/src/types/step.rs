//! Checkout wizard steps.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A section of the checkout wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    Cart,
    /// Only shown when there is no authenticated session.
    Login,
    Address,
    Payment,
    Review,
}

const GUEST_STEPS: &[CheckoutStep] = &[
    CheckoutStep::Cart,
    CheckoutStep::Login,
    CheckoutStep::Address,
    CheckoutStep::Payment,
    CheckoutStep::Review,
];

const MEMBER_STEPS: &[CheckoutStep] = &[
    CheckoutStep::Cart,
    CheckoutStep::Address,
    CheckoutStep::Payment,
    CheckoutStep::Review,
];

impl CheckoutStep {
    /// The ordered steps for a visitor with the given auth state.
    #[must_use]
    pub const fn sequence(authenticated: bool) -> &'static [Self] {
        if authenticated { MEMBER_STEPS } else { GUEST_STEPS }
    }

    /// Position of this step in the sequence, if it is part of it.
    #[must_use]
    pub fn index_in(self, authenticated: bool) -> Option<usize> {
        Self::sequence(authenticated).iter().position(|s| *s == self)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Cart => "Cart",
            Self::Login => "Login",
            Self::Address => "Address",
            Self::Payment => "Payment",
            Self::Review => "Review",
        }
    }
}

impl fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
