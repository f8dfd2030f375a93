use super::model::Estimation;

/// Min, max, mean and median of `data`; all zero for no data.
pub fn calc_stats(mut data: Vec<f64>) -> Estimation {
    if data.is_empty() {
        return Estimation::default();
    }
    data.sort_by(f64::total_cmp);

    let len = data.len();
    let median = if len % 2 == 0 {
        (data[len / 2 - 1] + data[len / 2]) / 2.0
    } else {
        data[len / 2]
    };

    Estimation {
        min: data[0],
        max: data[len - 1],
        mean: data.iter().sum::<f64>() / len as f64,
        median,
    }
}
