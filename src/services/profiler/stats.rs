use std::collections::HashMap;

use smallvec::SmallVec;

use super::infer::{as_boolean, as_datetime};
use super::types::{
    BooleanStats, CategoricalStats, Correlation, CorrelationMatrix, DatetimeStats, NumericStats,
    TextStats, ValueCount, TOP_VALUES,
};
use crate::models::{Column, Value};

/// Linear-interpolation quantile over ascending `sorted`, which must be non-empty.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Population statistics; `None` when there are no values.
pub fn numeric_stats(column: &Column, outlier_factor: f64) -> Option<NumericStats> {
    let mut values: Vec<f64> = column.values.iter().filter_map(Value::as_f64).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let q1 = quantile(&values, 0.25);
    let q3 = quantile(&values, 0.75);

    // too few points for a meaningful IQR
    let has_outliers = values.len() >= 4 && {
        let iqr = q3 - q1;
        let (lower, upper) = (q1 - outlier_factor * iqr, q3 + outlier_factor * iqr);
        values.iter().any(|&x| x < lower || x > upper)
    };

    Some(NumericStats {
        min: values[0],
        max: values[values.len() - 1],
        mean,
        median: quantile(&values, 0.5),
        std: variance.sqrt(),
        q1,
        q3,
        has_outliers,
        is_continuous: column.distinct_count() > 20,
    })
}

/// Value frequencies ordered by count descending, then value ascending.
pub fn categorical_stats(column: &Column) -> CategoricalStats {
    let mut counts: HashMap<_, (usize, &Value)> = HashMap::new();
    let mut present = 0usize;
    for value in column.values.iter().filter(|v| !v.is_missing()) {
        present += 1;
        counts.entry(value.key()).or_insert((0, value)).0 += 1;
    }

    let mut ranked: Vec<ValueCount> = counts
        .into_values()
        .map(|(count, value)| ValueCount {
            value: value.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));

    let n_categories = ranked.len();
    let most_common_share = ranked
        .first()
        .map_or(0.0, |top| top.count as f64 / present.max(1) as f64);
    let most_common = ranked.first().map(|top| top.value.clone());
    let top_values: SmallVec<[ValueCount; TOP_VALUES]> = ranked.into_iter().take(TOP_VALUES).collect();

    CategoricalStats {
        n_categories,
        top_values,
        most_common,
        most_common_share,
    }
}

pub fn text_stats(column: &Column) -> TextStats {
    let lengths: Vec<usize> = column
        .values
        .iter()
        .filter(|v| !v.is_missing())
        .map(|v| v.to_string().chars().count())
        .collect();
    let mean_length = if lengths.is_empty() {
        0.0
    } else {
        lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
    };
    TextStats { mean_length }
}

pub fn datetime_stats(column: &Column) -> Option<DatetimeStats> {
    let mut stamps = column.values.iter().filter_map(as_datetime);
    let first = stamps.next()?;
    let (min, max) = stamps.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
    Some(DatetimeStats {
        min,
        max,
        range_days: (max - min).num_days(),
    })
}

pub fn boolean_stats(column: &Column, n_rows: usize) -> BooleanStats {
    let (true_count, false_count) =
        column
            .values
            .iter()
            .filter_map(as_boolean)
            .fold((0, 0), |(t, f), b| if b { (t + 1, f) } else { (t, f + 1) });
    BooleanStats {
        true_count,
        false_count,
        true_percent: true_count as f64 / n_rows.max(1) as f64 * 100.0,
    }
}

/// Pearson r over rows where both sides are present.
pub fn pearson(xs: &[Value], ys: &[Value]) -> Correlation {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter_map(|(x, y)| Some((x.as_f64()?, y.as_f64()?)))
        .collect();
    if pairs.len() < 2 {
        return Correlation::Undefined;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let (dx, dy) = (x - mean_x, y - mean_y);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if sxx == 0.0 || syy == 0.0 {
        return Correlation::Undefined;
    }
    Correlation::Defined((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Pairwise matrix over `columns`. The diagonal is always 1.0.
pub fn correlation_matrix(columns: &[&Column]) -> CorrelationMatrix {
    let k = columns.len();
    let mut values = vec![vec![Correlation::Defined(1.0); k]; k];
    for i in 0..k {
        for j in (i + 1)..k {
            let r = pearson(&columns[i].values, &columns[j].values);
            values[i][j] = r;
            values[j][i] = r;
        }
    }
    CorrelationMatrix {
        columns: columns.iter().map(|c| c.name.clone()).collect(),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(name: &str, xs: &[i64]) -> Column {
        Column::new(name, xs.iter().map(|&x| Value::Int(x)).collect())
    }

    #[test]
    fn quartiles_interpolate() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.25), 1.75);
        assert_eq!(quantile(&sorted, 0.5), 2.5);
        assert_eq!(quantile(&[7.0], 0.75), 7.0);
    }

    #[test]
    fn population_std_and_outliers() {
        let stats = numeric_stats(&ints("x", &[2, 4, 4, 4, 5, 5, 7, 9]), 1.5).unwrap();
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.std, 2.0);
        assert_eq!(stats.median, 4.5);

        let flat = numeric_stats(&ints("x", &[1, 2, 3, 4]), 1.5).unwrap();
        assert!(!flat.has_outliers);

        let spiky = numeric_stats(&ints("x", &[1, 2, 3, 4, 100]), 1.5).unwrap();
        assert!(spiky.has_outliers);
        assert_eq!(spiky.max, 100.0);
    }

    #[test]
    fn perfect_correlation_is_one() {
        let r = pearson(&ints("a", &[1, 3, 5]).values, &ints("b", &[2, 4, 6]).values);
        assert_eq!(r, Correlation::Defined(1.0));
    }

    #[test]
    fn constant_column_correlation_is_undefined() {
        let a = ints("a", &[1, 2, 3]);
        let b = ints("b", &[4, 4, 4]);
        let matrix = correlation_matrix(&[&a, &b]);
        assert_eq!(matrix.get("a", "b"), Some(Correlation::Undefined));
        assert_eq!(matrix.get("b", "a"), Some(Correlation::Undefined));
        assert_eq!(matrix.get("b", "b"), Some(Correlation::Defined(1.0)));
    }

    #[test]
    fn top_values_break_ties_alphabetically() {
        let column = Column::new(
            "city",
            ["Lyon", "Paris", "Nice", "Paris", "Lyon"]
                .iter()
                .map(|s| Value::Text(s.to_string()))
                .collect(),
        );
        let stats = categorical_stats(&column);
        let order: Vec<&str> = stats.top_values.iter().map(|v| v.value.as_str()).collect();
        assert_eq!(order, vec!["Lyon", "Paris", "Nice"]);
        assert_eq!(stats.most_common.as_deref(), Some("Lyon"));
        assert_eq!(stats.most_common_share, 0.4);
    }
}
