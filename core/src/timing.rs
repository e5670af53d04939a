//! Timing helpers that report through `tracing`.

/// Await `$future` and log how long it took at debug level.
///
/// Extra `key = value` tracing fields may follow the future. Returns the
/// future's output.
#[macro_export]
macro_rules! measure_time_async {
    ($label:expr, $future:expr $(, $field:ident = $value:expr)* $(,)?) => {{
        let __start = ::tokio::time::Instant::now();
        let __result = $future.await;
        let __elapsed = __start.elapsed();
        ::tracing::debug!(
            operation = $label,
            elapsed_ms = __elapsed.as_millis() as u64,
            $($field = $value,)*
            "Operation completed"
        );
        __result
    }};
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn returns_the_future_output() {
        let value = measure_time_async!(
            "sleepy",
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                11
            },
            endpoint = "status"
        );
        assert_eq!(value, 11);
    }
}
