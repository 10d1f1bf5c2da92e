//! Gateway ingress guardrails (§4.5, §9.1): per-caller rate limiting ahead
//! of schema validation. Narrower than the teacher's `SafetyGuard` (which
//! also filtered tool-call content) because this system has no free-form
//! tool-call surface of its own to police — the `ToolServer` it dispatches
//! to is an external collaborator, not something this crate executes code
//! inside of.

mod rate_limiter;

pub use rate_limiter::CallerRateLimiter;
