use energy_client::domain::{MetricKind, Reading, ReadingBatch};
use time::macros::datetime;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingRejected {
    #[error("value must be finite")]
    NonFinite,
    #[error("value must be non-negative")]
    Negative,
    #[error("timestamp out of allowed range")]
    TimestampOutOfRange,
}

/// Pure validation of a raw `Reading`.
///
/// Rules:
/// - value must be finite and non-negative.
/// - timestamp must be within a broad sanity window [2000-01-01, 2100-01-01].
pub fn validate_reading(reading: &Reading) -> Result<(), ReadingRejected> {
    if !reading.value.is_finite() {
        return Err(ReadingRejected::NonFinite);
    }
    if reading.value < 0.0 {
        return Err(ReadingRejected::Negative);
    }

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if reading.timestamp < min_ts || reading.timestamp > max_ts {
        return Err(ReadingRejected::TimestampOutOfRange);
    }

    Ok(())
}

/// Drops invalid readings, and readings filed under another entity, from a batch.
pub fn validated(batch: ReadingBatch) -> ReadingBatch {
    batch
        .into_iter()
        .map(|(entity_id, readings)| {
            let kept = readings
                .into_iter()
                .filter(|r| {
                    if r.entity_id != entity_id {
                        tracing::debug!(expected = %entity_id, actual = %r.entity_id, "reading filed under wrong entity");
                        metrics::counter!("readings_rejected_total").increment(1);
                        return false;
                    }
                    match validate_reading(r) {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::debug!(entity = %r.entity_id, metric = %r.metric, error = %e, "reading rejected");
                            metrics::counter!("readings_rejected_total").increment(1);
                            false
                        }
                    }
                })
                .collect();
            (entity_id, kept)
        })
        .collect()
}

/// Native backend unit to kWh.
pub fn to_kwh(raw: f64, scale: f64) -> f64 {
    raw * scale
}

/// Newest reading of `metric`; on equal timestamps the one issued last wins.
pub fn latest_reading(readings: &[Reading], metric: MetricKind) -> Option<&Reading> {
    readings.iter().filter(|r| r.metric == metric).max_by_key(|r| r.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_client::domain::EntityId;
    use time::macros::datetime;

    fn reading(value: f64, ts: time::OffsetDateTime) -> Reading {
        Reading::new("hiltrup", MetricKind::Power, ts, value)
    }

    #[test]
    fn validation_accepts_valid_reading() {
        assert_eq!(validate_reading(&reading(1.0, datetime!(2024-01-01 00:00:00 UTC))), Ok(()));
    }

    #[test]
    fn validation_rejects_negative_and_nan_values() {
        let ts = datetime!(2024-01-01 00:00:00 UTC);
        assert_eq!(validate_reading(&reading(-0.1, ts)), Err(ReadingRejected::Negative));
        assert_eq!(validate_reading(&reading(f64::NAN, ts)), Err(ReadingRejected::NonFinite));
    }

    #[test]
    fn validation_rejects_out_of_range_ts() {
        assert_eq!(
            validate_reading(&reading(1.0, datetime!(1800-01-01 00:00:00 UTC))),
            Err(ReadingRejected::TimestampOutOfRange)
        );
    }

    #[test]
    fn validated_batch_keeps_only_good_readings() {
        let ts = datetime!(2024-01-01 00:00:00 UTC);
        let mut batch = ReadingBatch::new();
        batch.insert(
            EntityId::from("hiltrup"),
            vec![
                reading(5.0, ts),
                reading(-1.0, ts),
                Reading::new("prefab", MetricKind::Power, ts, 3.0),
            ],
        );

        let batch = validated(batch);
        assert_eq!(batch["hiltrup"], vec![reading(5.0, ts)]);
    }

    #[test]
    fn latest_reading_picks_newest_then_last_issued() {
        let readings = vec![
            reading(1.0, datetime!(2024-01-01 10:00:00 UTC)),
            reading(3.0, datetime!(2024-01-01 12:00:00 UTC)),
            reading(2.0, datetime!(2024-01-01 11:00:00 UTC)),
            reading(4.0, datetime!(2024-01-01 12:00:00 UTC)),
            Reading::new("hiltrup", MetricKind::Gas, datetime!(2024-01-02 00:00:00 UTC), 99.0),
        ];

        assert_eq!(latest_reading(&readings, MetricKind::Power).map(|r| r.value), Some(4.0));
        assert_eq!(latest_reading(&readings, MetricKind::Gas).map(|r| r.value), Some(99.0));
        assert_eq!(latest_reading(&[], MetricKind::Gas), None);
    }

    #[test]
    fn half_scale_halves_the_raw_value() {
        assert_eq!(to_kwh(1000.0, 0.5), 500.0);
    }
}
