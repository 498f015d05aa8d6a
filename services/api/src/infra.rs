use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_accepts_iso_dates_only() {
        assert_eq!(
            parse_date(" 2025-11-07 "),
            Ok(NaiveDate::from_ymd_opt(2025, 11, 7).expect("date"))
        );
        let err = parse_date("Nov 7, 2025").expect_err("rejected");
        assert!(err.contains("YYYY-MM-DD"));
    }
}
