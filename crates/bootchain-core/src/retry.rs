//! Bounded credential retry shared by every unlock mode.

use crate::error::{BootError, BootResult};
use log::warn;

/// Obtain a credential and try it, up to `max_attempts` times.
///
/// `obtain` is called before every attempt with the 1-based attempt number.
/// Retryable failures from `attempt` consume one attempt; anything else is
/// returned immediately. Running out of attempts yields
/// `BootError::CredentialsExhausted` carrying the last failure. A limit of
/// zero is treated as one.
pub fn bounded_retry<C, T, O, A>(
    target: &str,
    max_attempts: u32,
    mut obtain: O,
    mut attempt: A,
) -> BootResult<T>
where
    O: FnMut(u32) -> BootResult<C>,
    A: FnMut(&C, u32) -> BootResult<T>,
{
    let max_attempts = max_attempts.max(1);
    let mut current = 1;
    loop {
        let credential = obtain(current)?;
        match attempt(&credential, current) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                if current >= max_attempts {
                    return Err(BootError::CredentialsExhausted {
                        target: target.to_string(),
                        attempts: current,
                        last: err.to_string(),
                    });
                }
                warn!("attempt {current}/{max_attempts} for {target} failed: {err}");
                current += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
