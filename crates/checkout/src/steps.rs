//! Checkout wizard navigation.
//!
//! The step list depends on whether the visitor is signed in, so positions
//! are always looked up in the current sequence rather than stored.

use gapa_core::CheckoutStep;
use serde::Serialize;

use crate::error::add_breadcrumb;

/// Facts the forward transitions depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepGates {
    /// The cart has at least one line.
    pub cart_ready: bool,
    /// The visitor signed in or chose to continue as a guest.
    pub identity_ready: bool,
    /// Address fields are complete and the delivery price is settled.
    pub address_valid: bool,
}

/// Why the wizard refused to move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Blocked {
    EmptyCart,
    NeedsIdentity,
    AddressIncomplete,
    /// Review is left by paying, not by advancing.
    LastStep,
}

/// Current position in the checkout wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepController {
    authenticated: bool,
    current: CheckoutStep,
}

impl StepController {
    #[must_use]
    pub const fn new(authenticated: bool) -> Self {
        Self {
            authenticated,
            current: CheckoutStep::Cart,
        }
    }

    #[must_use]
    pub const fn current(&self) -> CheckoutStep {
        self.current
    }

    #[must_use]
    pub const fn steps(&self) -> &'static [CheckoutStep] {
        CheckoutStep::sequence(self.authenticated)
    }

    /// Position of the current step.
    #[must_use]
    pub fn index(&self) -> usize {
        self.current.index_in(self.authenticated).unwrap_or(0)
    }

    /// Update the auth state, e.g. after login or logout.
    ///
    /// Signing in while on Login moves on to Address; signing out past Cart
    /// returns to Cart.
    pub fn set_authenticated(&mut self, authenticated: bool) {
        if self.authenticated == authenticated {
            return;
        }
        self.authenticated = authenticated;
        let next = match (authenticated, self.current) {
            (true, CheckoutStep::Login) => CheckoutStep::Address,
            (false, _) => CheckoutStep::Cart,
            (true, step) => step,
        };
        self.move_to(next);
    }

    /// Leave Login as a guest.
    ///
    /// Returns `false` if not on the Login step.
    pub fn continue_as_guest(&mut self) -> bool {
        if self.current != CheckoutStep::Login {
            return false;
        }
        self.move_to(CheckoutStep::Address);
        true
    }

    /// Move one step forward if the current step's gate allows it.
    ///
    /// # Errors
    ///
    /// Returns why the current step cannot be left. Nothing changes.
    pub fn advance(&mut self, gates: StepGates) -> Result<CheckoutStep, Blocked> {
        match self.current {
            CheckoutStep::Cart if !gates.cart_ready => return Err(Blocked::EmptyCart),
            CheckoutStep::Login if !gates.identity_ready => return Err(Blocked::NeedsIdentity),
            CheckoutStep::Address if !gates.address_valid => {
                return Err(Blocked::AddressIncomplete);
            }
            CheckoutStep::Review => return Err(Blocked::LastStep),
            _ => {}
        }
        let next = self
            .steps()
            .get(self.index() + 1)
            .copied()
            .ok_or(Blocked::LastStep)?;
        self.move_to(next);
        Ok(next)
    }

    /// Move one step back. Returns `false` on the first step.
    pub fn go_back(&mut self) -> bool {
        let Some(index) = self.index().checked_sub(1) else {
            return false;
        };
        let previous = self.steps()[index];
        self.move_to(previous);
        true
    }

    /// Jump to an earlier (or the current) step by position.
    ///
    /// Returns `false` for positions ahead of the current step.
    pub fn jump_to(&mut self, index: usize) -> bool {
        if index > self.index() {
            return false;
        }
        let target = self.steps()[index];
        self.move_to(target);
        true
    }

    fn move_to(&mut self, step: CheckoutStep) {
        if step == self.current {
            return;
        }
        add_breadcrumb(
            "checkout.step",
            "Checkout step changed",
            &[("from", self.current.label()), ("to", step.label())],
        );
        tracing::debug!(from = %self.current, to = %step, "Checkout step changed");
        self.current = step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPEN: StepGates = StepGates {
        cart_ready: true,
        identity_ready: true,
        address_valid: true,
    };

    #[test]
    fn test_guest_walks_every_step() {
        let mut steps = StepController::new(false);
        assert_eq!(steps.advance(OPEN), Ok(CheckoutStep::Login));
        assert_eq!(steps.advance(OPEN), Ok(CheckoutStep::Address));
        assert_eq!(steps.advance(OPEN), Ok(CheckoutStep::Payment));
        assert_eq!(steps.advance(OPEN), Ok(CheckoutStep::Review));
        assert_eq!(steps.index(), 4);
        assert_eq!(steps.advance(OPEN), Err(Blocked::LastStep));
    }

    #[test]
    fn test_member_skips_login() {
        let mut steps = StepController::new(true);
        assert_eq!(steps.advance(OPEN), Ok(CheckoutStep::Address));
        assert_eq!(steps.index(), 1);
    }

    #[test]
    fn test_gates_refuse_without_moving() {
        let mut steps = StepController::new(true);
        let closed = StepGates::default();
        assert_eq!(steps.advance(closed), Err(Blocked::EmptyCart));
        assert_eq!(steps.current(), CheckoutStep::Cart);

        steps.advance(OPEN).unwrap();
        assert_eq!(steps.advance(closed), Err(Blocked::AddressIncomplete));
        assert_eq!(steps.current(), CheckoutStep::Address);

        steps.advance(OPEN).unwrap();
        // Payment -> Review is unconditional.
        assert_eq!(steps.advance(closed), Ok(CheckoutStep::Review));
    }

    #[test]
    fn test_login_needs_identity() {
        let mut steps = StepController::new(false);
        steps.advance(OPEN).unwrap();
        let anonymous = StepGates {
            identity_ready: false,
            ..OPEN
        };
        assert_eq!(steps.advance(anonymous), Err(Blocked::NeedsIdentity));
        assert!(steps.continue_as_guest());
        assert_eq!(steps.current(), CheckoutStep::Address);
        assert!(!steps.continue_as_guest());
    }

    #[test]
    fn test_login_moves_past_login_step() {
        let mut steps = StepController::new(false);
        steps.advance(OPEN).unwrap();
        steps.set_authenticated(true);
        assert_eq!(steps.current(), CheckoutStep::Address);
        assert_eq!(steps.index(), 1);

        steps.set_authenticated(false);
        assert_eq!(steps.current(), CheckoutStep::Cart);
    }

    #[test]
    fn test_back_and_jump() {
        let mut steps = StepController::new(true);
        assert!(!steps.go_back());
        steps.advance(OPEN).unwrap();
        steps.advance(OPEN).unwrap();

        assert!(!steps.jump_to(3));
        assert!(steps.jump_to(2));
        assert!(steps.jump_to(0));
        assert_eq!(steps.current(), CheckoutStep::Cart);

        steps.advance(OPEN).unwrap();
        assert!(steps.go_back());
        assert_eq!(steps.current(), CheckoutStep::Cart);
    }
}
