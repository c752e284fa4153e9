//! 汇总统计：均值与最近秩百分位
//!
//! 系统一般只评几十条用例，不同百分位口径在小 N 下会给出不同数字，
//! 这里固定为最近秩（nearest-rank）法：对 N 个样本求 p 百分位，
//! 取排序后第 ceil(p/100 · N) 个（下标减一并收敛到 [0, N-1]）。
//! 例：[1,2,3,4,5] 的 p95 = 5；[10,20] 的 p95 = 20。

/// 算术平均；空样本返回 None，绝不除零
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// 最近秩百分位（p 取 0-100）；空样本返回 None
pub fn percentile_nearest_rank(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(n - 1);
    Some(sorted[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p95_five_samples() {
        assert_eq!(
            percentile_nearest_rank(&[1.0, 2.0, 3.0, 4.0, 5.0], 95.0),
            Some(5.0)
        );
    }

    #[test]
    fn test_p95_two_samples() {
        assert_eq!(percentile_nearest_rank(&[10.0, 20.0], 95.0), Some(20.0));
    }

    #[test]
    fn test_p50_median() {
        assert_eq!(
            percentile_nearest_rank(&[5.0, 1.0, 3.0, 2.0, 4.0], 50.0),
            Some(3.0)
        );
    }

    #[test]
    fn test_empty_samples() {
        assert_eq!(percentile_nearest_rank(&[], 95.0), None);
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[2.0, 4.0]), Some(3.0));
    }
}
