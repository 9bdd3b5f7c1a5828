#[cfg(test)]
mod property_tests {
    use ndarray::Array3;
    use pixel_ppo::algorithms::{clip_ratio, clipped_surrogate, discounted_returns, normalize};
    use pixel_ppo::distribution::Categorical;
    use pixel_ppo::rollout_buffer::{RolloutBuffer, Transition};
    use proptest::prelude::*;

    fn rewards_strategy() -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(-10.0f32..10.0, 1..40)
    }

    proptest! {
        #[test]
        fn test_returns_after_terminal_ignore_earlier_rewards(
            before in rewards_strategy(),
            replacement in rewards_strategy(),
            after in rewards_strategy(),
            gamma in 0.0f32..=1.0,
        ) {
            // First episode ends at the last step of `before`
            let build = |head: &[f32]| {
                let mut rewards = head.to_vec();
                rewards.extend_from_slice(&after);
                let mut terminals = vec![false; head.len()];
                *terminals.last_mut().unwrap() = true;
                terminals.extend(std::iter::repeat(false).take(after.len()));
                discounted_returns(&rewards, &terminals, gamma)
            };
            let a = build(&before);
            let b = build(&replacement);
            prop_assert_eq!(&a[before.len()..], &b[replacement.len()..]);
        }

        #[test]
        fn test_returns_match_forward_sum(rewards in rewards_strategy(), gamma in 0.0f32..=1.0) {
            let terminals = vec![false; rewards.len()];
            let returns = discounted_returns(&rewards, &terminals, gamma);
            prop_assert_eq!(returns.len(), rewards.len());
            let direct: f32 = rewards.iter().enumerate().map(|(t, r)| gamma.powi(t as i32) * r).sum();
            prop_assert!((returns[0] - direct).abs() < 1e-2 * (1.0 + direct.abs()));
        }

        #[test]
        fn test_normalized_returns_are_standardized(values in prop::collection::vec(-100.0f32..100.0, 2..50)) {
            let (normalized, std) = normalize(&values, 1e-7);
            prop_assert!(normalized.iter().all(|v| v.is_finite()));
            if std > 1e-2 {
                let mean = normalized.sum() / normalized.len() as f32;
                prop_assert!(mean.abs() < 1e-3);
                let var = normalized.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / (normalized.len() - 1) as f32;
                prop_assert!((var - 1.0).abs() < 1e-2);
            }
        }

        #[test]
        fn test_surrogate_never_exceeds_unclipped(ratio in 0.0f32..5.0, advantage in -10.0f32..10.0, eps in 0.01f32..0.5) {
            let surrogate = clipped_surrogate(ratio, advantage, eps);
            prop_assert!(surrogate <= ratio * advantage + 1e-5);
            let clipped = clip_ratio(ratio, eps);
            prop_assert!(clipped >= 1.0 - eps && clipped <= 1.0 + eps);
        }

        #[test]
        fn test_categorical_is_normalized(logits in prop::collection::vec(-50.0f32..50.0, 1..12)) {
            let dist = Categorical::from_logits(ndarray::Array1::from(logits.clone()).view()).unwrap();
            let total: f32 = dist.probs().sum();
            prop_assert!((total - 1.0).abs() < 1e-4);
            let entropy = dist.entropy();
            prop_assert!(entropy >= -1e-5 && entropy <= (logits.len() as f32).ln() + 1e-4);
        }

        #[test]
        fn test_clear_is_idempotent(len in 0usize..20) {
            let mut buffer = RolloutBuffer::new();
            for i in 0..len {
                buffer.push(Transition {
                    state: Array3::zeros((1, 2, 2)),
                    action: i % 3,
                    log_prob: -1.0,
                    reward: i as f32,
                    is_terminal: i % 5 == 4,
                });
            }
            prop_assert_eq!(buffer.len(), len);
            buffer.clear();
            prop_assert!(buffer.is_empty());
            buffer.clear();
            prop_assert!(buffer.is_empty());
            prop_assert_eq!(buffer.len(), 0);
        }
    }
}
