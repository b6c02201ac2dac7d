use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use log::warn;

use super::{EmbeddingProvider, ProviderResult, VisionSummarizer};
use crate::error::ProviderError;
use crate::metrics;

/// 瞬时错误的重试策略，等待时间按指数增长
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 最多尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 第一次重试前的等待时间
    pub base_delay: Duration,
    /// 单次等待时间上限
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// 执行 `f`，遇到瞬时错误时等待后重试
    ///
    /// 非瞬时错误直接返回；重试耗尽时返回 `ProviderError::RetriesExhausted`
    pub async fn run<T, F, Fut>(&self, provider: &str, call: &str, mut f: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let attempts = AtomicU32::new(0);
        let result = (|| {
            attempts.fetch_add(1, Ordering::Relaxed);
            f()
        })
        .retry(&self.backoff())
        .when(ProviderError::is_transient)
        .notify(|e: &ProviderError, delay: Duration| {
            let attempt = attempts.load(Ordering::Relaxed);
            warn!("{provider} {call} 失败，{}ms 后重试 ({attempt}/{max_attempts}): {e}", delay.as_millis());
            metrics::inc_provider_retry(provider, call);
        })
        .await;

        match result {
            Err(e) if e.is_transient() => Err(ProviderError::RetriesExhausted {
                attempts: attempts.load(Ordering::Relaxed),
                last: Box::new(e),
            }),
            other => other,
        }
    }
}

/// 为任意模型服务加上重试策略
pub struct Retrying<P> {
    inner: P,
    name: &'static str,
    policy: RetryPolicy,
}

impl<P> Retrying<P> {
    pub fn new(inner: P, name: &'static str, policy: RetryPolicy) -> Self {
        Self { inner, name, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for Retrying<P> {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        self.policy.run(self.name, "embed", || self.inner.embed(text)).await
    }
}

#[async_trait]
impl<P: VisionSummarizer> VisionSummarizer for Retrying<P> {
    async fn describe(&self, image: &[u8], prompt: &str) -> ProviderResult<String> {
        self.policy.run(self.name, "describe", || self.inner.describe(image, prompt)).await
    }
}

#[cfg(test)]
mod tests {
    use backon::BackoffBuilder;

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    /// 前 `failures` 次返回指定错误，之后成功
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        status: u16,
    }

    #[async_trait]
    impl EmbeddingProvider for Flaky {
        fn model(&self) -> &str {
            "flaky"
        }

        async fn embed(&self, _text: &str) -> ProviderResult<Vec<f32>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ProviderError::Status { status: self.status, body: "busy".into() })
            } else {
                Ok(vec![1.0])
            }
        }
    }

    fn flaky(failures: u32, status: u16) -> Flaky {
        Flaky { calls: AtomicU32::new(0), failures, status }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        let delays = policy.backoff().build().collect::<Vec<_>>();
        assert_eq!(delays.len(), 3);
        assert_eq!(delays[0], Duration::from_millis(100));
        assert!(delays[1] > delays[0]);
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(350)));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let p = Retrying::new(flaky(2, 503), "test", fast_policy(3));
        assert_eq!(p.embed("x").await.unwrap(), vec![1.0]);
        assert_eq!(p.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let p = Retrying::new(flaky(5, 400), "test", fast_policy(3));
        let err = p.embed("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 400, .. }));
        assert_eq!(p.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let p = Retrying::new(flaky(10, 429), "test", fast_policy(3));
        let err = p.embed("x").await.unwrap_err();
        match err {
            ProviderError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ProviderError::Status { status: 429, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(p.inner().calls.load(Ordering::SeqCst), 3);
    }
}
