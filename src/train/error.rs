use crate::{
    data::DataPoint,
    error::NetResult,
    net::Network,
    stats::Stats,
};

/// Loss of every sample in `data`, evaluated without touching the network.
pub fn compute_error_stats(net: &Network, data: &[DataPoint]) -> NetResult<Stats> {
    let error_fn = net.error_fn();
    let mut stats = Stats::new();
    for point in data {
        let output = net.evaluate(&point.input)?;
        stats.report(error_fn.sample_error(&point.output, &output));
    }
    Ok(stats)
}
