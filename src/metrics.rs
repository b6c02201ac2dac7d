use std::sync::LazyLock;

use prometheus::*;

static METRIC_PROVIDER_CALL_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "mvsearch_provider_call_count",
        "count of the model provider calls",
        &["provider", "call", "status"]
    )
    .unwrap()
});

static METRIC_PROVIDER_CALL_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "mvsearch_provider_call_duration",
        "duration of the per-request provider call in seconds",
        &["provider", "call"]
    )
    .unwrap()
});

static METRIC_PROVIDER_RETRY_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "mvsearch_provider_retry_count",
        "count of the retried provider calls",
        &["provider", "call"]
    )
    .unwrap()
});

static METRIC_SUMMARY_DEGRADED_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "mvsearch_summary_degraded_count",
        "count of the image summaries replaced by empty text",
        &["field"]
    )
    .unwrap()
});

static METRIC_QUERY_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "mvsearch_query_duration",
        "duration of the per-query retrieval in seconds",
        &["backend"]
    )
    .unwrap()
});

pub fn observe_provider_call(provider: &str, call: &str, ok: bool, duration: f64) {
    let status = if ok { "ok" } else { "error" };
    METRIC_PROVIDER_CALL_COUNT.with_label_values(&[provider, call, status]).inc();
    METRIC_PROVIDER_CALL_DURATION.with_label_values(&[provider, call]).observe(duration);
}

pub fn inc_provider_retry(provider: &str, call: &str) {
    METRIC_PROVIDER_RETRY_COUNT.with_label_values(&[provider, call]).inc();
}

/// 摘要或文字提取失败，使用空文本代替
pub fn inc_summary_degraded(field: &str) {
    METRIC_SUMMARY_DEGRADED_COUNT.with_label_values(&[field]).inc();
}

pub fn observe_query_duration(backend: &str, duration: f64) {
    METRIC_QUERY_DURATION.with_label_values(&[backend]).observe(duration);
}

/// 将当前进程的全部指标推送到 Pushgateway
pub fn push(job: &str, instance: &str, url: &str) -> Result<()> {
    let families = gather();
    push_metrics(job, labels! { "instance".to_owned() => instance.to_owned() }, url, families, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        inc_summary_degraded("metrics-test");
        inc_summary_degraded("metrics-test");
        assert_eq!(METRIC_SUMMARY_DEGRADED_COUNT.with_label_values(&["metrics-test"]).get(), 2);

        observe_provider_call("metrics-test", "embed", false, 0.1);
        let counter = METRIC_PROVIDER_CALL_COUNT.with_label_values(&["metrics-test", "embed", "error"]);
        assert_eq!(counter.get(), 1);
    }
}
