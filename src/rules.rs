use crate::models::{AggregateSnapshot, AlertIntent, AlertKind};

pub const LOW_MEAN_THRESHOLD: f64 = 3.5;
pub const HIGH_MEAN_THRESHOLD: f64 = 4.5;
pub const MIN_RESPONSE_COUNT: i64 = 5;

/// Maps an aggregate snapshot to at most one alert intent.
///
/// Branches are checked in precedence order; the first match wins. Mean
/// thresholds are strict `<` on the low side and inclusive `>=` on the
/// high side, over all ratings ever recorded for the questionnaire.
pub fn evaluate(aggregate: &AggregateSnapshot) -> Option<AlertIntent> {
    let low_mean = aggregate.mean_rating < LOW_MEAN_THRESHOLD;
    let low_count = aggregate.response_count < MIN_RESPONSE_COUNT;
    let label = aggregate.questionnaire_type.label();

    if low_mean && low_count {
        return Some(AlertIntent {
            kind: AlertKind::Negative,
            title: format!("Feedback needs attention ({label})"),
            message: format!(
                "Average rating is low ({:.2}) and only {} response(s) have come in",
                aggregate.mean_rating, aggregate.response_count
            ),
        });
    }

    if low_mean {
        return Some(AlertIntent {
            kind: AlertKind::Negative,
            title: format!("Feedback needs attention ({label})"),
            message: format!("Average rating is low ({:.2})", aggregate.mean_rating),
        });
    }

    if low_count {
        return Some(AlertIntent {
            kind: AlertKind::Negative,
            title: format!("Feedback needs attention ({label})"),
            message: format!(
                "Only {} response(s) have come in so far",
                aggregate.response_count
            ),
        });
    }

    if aggregate.mean_rating >= HIGH_MEAN_THRESHOLD
        && aggregate.response_count >= MIN_RESPONSE_COUNT
    {
        return Some(AlertIntent {
            kind: AlertKind::Positive,
            title: format!("Feedback is outstanding ({label})"),
            message: format!(
                "Average rating is {:.2} across {} responses",
                aggregate.mean_rating, aggregate.response_count
            ),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionnaireType;

    fn snapshot(count: i64, mean: f64) -> AggregateSnapshot {
        AggregateSnapshot {
            response_count: count,
            mean_rating: mean,
            questionnaire_type: QuestionnaireType::During,
        }
    }

    #[test]
    fn low_mean_and_low_count_cites_both() {
        let intent = evaluate(&snapshot(3, 2.33)).expect("intent");
        assert_eq!(intent.kind, AlertKind::Negative);
        assert!(intent.message.contains("2.33"));
        assert!(intent.message.contains("3 response"));
    }

    #[test]
    fn low_mean_alone_cites_mean_only() {
        let intent = evaluate(&snapshot(8, 3.1)).expect("intent");
        assert_eq!(intent.kind, AlertKind::Negative);
        assert!(intent.message.contains("3.10"));
        assert!(!intent.message.contains("8 response"));
    }

    #[test]
    fn low_count_alone_cites_count_only() {
        let intent = evaluate(&snapshot(4, 4.0)).expect("intent");
        assert_eq!(intent.kind, AlertKind::Negative);
        assert!(intent.message.contains("4 response"));
        assert!(!intent.message.contains("4.00"));
    }

    #[test]
    fn high_mean_with_enough_responses_is_positive() {
        let intent = evaluate(&snapshot(6, 5.0)).expect("intent");
        assert_eq!(intent.kind, AlertKind::Positive);
    }

    #[test]
    fn middle_ground_produces_no_intent() {
        assert!(evaluate(&snapshot(10, 4.0)).is_none());
    }

    #[test]
    fn boundaries_follow_strict_comparisons() {
        // (count, mean, expected kind or None)
        let cases: &[(i64, f64, Option<AlertKind>)] = &[
            (10, 3.49, Some(AlertKind::Negative)),
            (10, 3.5, None),
            (4, 4.0, Some(AlertKind::Negative)),
            (5, 4.0, None),
            (5, 4.49, None),
            (5, 4.5, Some(AlertKind::Positive)),
            (4, 4.5, Some(AlertKind::Negative)),
        ];

        for (count, mean, expected) in cases {
            let got = evaluate(&snapshot(*count, *mean)).map(|i| i.kind);
            assert_eq!(got, *expected, "count={count} mean={mean}");
        }
    }

    #[test]
    fn title_carries_questionnaire_type_label() {
        let during = evaluate(&snapshot(3, 2.0)).expect("intent");
        assert!(during.title.contains("during course"));

        let after = evaluate(&AggregateSnapshot {
            response_count: 3,
            mean_rating: 2.0,
            questionnaire_type: QuestionnaireType::After,
        })
        .expect("intent");
        assert!(after.title.contains("after course"));
    }
}
