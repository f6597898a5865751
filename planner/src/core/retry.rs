//! Bounded retry applied around a single pipeline stage.

use anyhow::{Result, anyhow};

use super::state::Phase;

/// Retry policy for one stage: up to `max_attempts` tries, no backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub phase: Phase,
}

impl RetryPolicy {
    pub fn new(phase: Phase, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            phase,
        }
    }

    /// Call `attempt` with 1-based attempt numbers until it returns `Ok`.
    ///
    /// Returns the value and the attempt number that produced it. When every
    /// attempt fails the last error is returned with the attempt count as context.
    pub fn run<T, F>(&self, mut attempt: F) -> Result<(T, u32)>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let mut last_err = None;
        for number in 1..=self.max_attempts {
            match attempt(number) {
                Ok(value) => return Ok((value, number)),
                Err(err) => last_err = Some(err),
            }
        }
        let err = last_err.unwrap_or_else(|| anyhow!("no attempts were made"));
        Err(err.context(format!(
            "{} failed after {} attempts",
            self.phase.as_str(),
            self.max_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[test]
    fn returns_first_success_and_its_attempt() {
        let policy = RetryPolicy::new(Phase::IssueGeneration, 3);
        let mut calls = 0;

        let (value, attempt) = policy
            .run(|n| {
                calls += 1;
                if n < 3 {
                    bail!("attempt {n} failed");
                }
                Ok("issues")
            })
            .expect("third attempt succeeds");

        assert_eq!(value, "issues");
        assert_eq!(attempt, 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn stops_at_the_bound() {
        let policy = RetryPolicy::new(Phase::IssueGeneration, 3);
        let mut calls = 0;

        let err = policy
            .run(|n| -> Result<()> {
                calls += 1;
                bail!("attempt {n} failed")
            })
            .expect_err("all attempts fail");

        assert_eq!(calls, 3);
        let chain = format!("{err:#}");
        assert!(chain.contains("issue_generation failed after 3 attempts"), "{chain}");
        assert!(chain.contains("attempt 3 failed"), "{chain}");
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(Phase::IssueGeneration, 0);
        assert_eq!(policy.max_attempts, 1);
    }
}
