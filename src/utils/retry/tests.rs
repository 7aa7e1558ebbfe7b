use super::*;

/// Fails with a retryable error a fixed number of times, then succeeds.
struct Flaky {
    failures_left: u32,
    calls: u32,
    fatal: bool,
}

#[async_trait]
impl RetryableOperation for Flaky {
    type Success = u32;
    type Failure = String;

    fn name(&self) -> &str {
        "flaky"
    }

    async fn try_execute(&mut self) -> RetryOutcome<u32, String> {
        self.calls += 1;
        if self.fatal {
            return RetryOutcome::Fatal("broken".to_string());
        }
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return RetryOutcome::Retryable("conflict".to_string());
        }
        RetryOutcome::Success(self.calls)
    }
}

fn fast_backoff(max_times: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(2))
        .with_max_times(max_times)
}

#[tokio::test]
async fn test_succeeds_after_retryable_failures() {
    let op = Flaky {
        failures_left: 2,
        calls: 0,
        fatal: false,
    };
    let calls = run_with_retry(op, fast_backoff(5)).await.unwrap();
    assert_eq!(calls, 3);
}

#[tokio::test]
async fn test_exhausted_reports_attempts() {
    let op = Flaky {
        failures_left: 10,
        calls: 0,
        fatal: false,
    };
    match run_with_retry(op, fast_backoff(3)).await {
        Err(RetryFailure::Exhausted { attempts, last }) => {
            assert_eq!(attempts, 4);
            assert_eq!(last, "conflict");
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fatal_stops_immediately() {
    let op = Flaky {
        failures_left: 0,
        calls: 0,
        fatal: true,
    };
    let result = run_with_retry(op, fast_backoff(5)).await;
    assert!(matches!(result, Err(RetryFailure::Fatal(ref e)) if e == "broken"));
}

#[test]
fn test_transaction_backoff_bounds_retries() {
    let limits = LedgerLimits {
        purchase_max_retries: 4,
        retry_min_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..LedgerLimits::default()
    };
    let delays: Vec<Duration> = transaction_backoff(&limits).build().collect();
    assert_eq!(delays.len(), 4);
    // Jitter can at most double a capped delay.
    assert!(delays.iter().all(|d| *d <= Duration::from_millis(10)));
}
