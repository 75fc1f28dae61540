//! Rendering of a [`Report`] into metric families.

use std::sync::atomic::Ordering;

use dashmap::DashMap;

use super::{METRIC_PREFIX, MetricFamily, MetricKind, Sample};
use crate::report::{DistributionKind, Report, SizeDistribution, Stats};

type Label = (&'static str, String);

/// Renders every statistics family of one report.
///
/// Per-scope families are emitted only when the scope map holds entries; in
/// particular path and path-set families disappear entirely when nothing is
/// configured. Samples are ordered by label value so output is deterministic.
pub fn report_families(report: &Report) -> Vec<MetricFamily> {
    let mut families = Vec::new();
    overall_families(&mut families, &report.overall);
    scope_families(&mut families, "user_", "user_name", &report.by_user, true);
    scope_families(&mut families, "group_", "group_name", &report.by_group, false);
    scope_families(&mut families, "path_", "path", &report.by_path, false);
    scope_families(
        &mut families,
        "path_set_",
        "path_set",
        &report.by_path_set,
        false,
    );
    families
}

fn overall_families(out: &mut Vec<MetricFamily>, overall: &Stats) {
    out.push(MetricFamily {
        name: format!("{METRIC_PREFIX}dirs"),
        help: "Number of directories.",
        kind: MetricKind::Gauge,
        samples: vec![plain_sample(
            &format!("{METRIC_PREFIX}dirs"),
            overall.directories.load(Ordering::Relaxed) as f64,
        )],
    });
    out.push(MetricFamily {
        name: format!("{METRIC_PREFIX}blocks"),
        help: "Number of blocks.",
        kind: MetricKind::Gauge,
        samples: vec![plain_sample(
            &format!("{METRIC_PREFIX}blocks"),
            overall.blocks.load(Ordering::Relaxed) as f64,
        )],
    });
    out.push(MetricFamily {
        name: format!("{METRIC_PREFIX}links"),
        help: "Number of sym links.",
        kind: MetricKind::Gauge,
        samples: vec![plain_sample(
            &format!("{METRIC_PREFIX}links"),
            overall.symlinks.load(Ordering::Relaxed) as f64,
        )],
    });

    let mut fsize = Vec::new();
    distribution_samples(&format!("{METRIC_PREFIX}fsize"), &[], &overall.file_size, &mut fsize);
    out.push(MetricFamily {
        name: format!("{METRIC_PREFIX}fsize"),
        help: "Overall file size distribution",
        kind: distribution_kind(&overall.file_size),
        samples: fsize,
    });

    let mut csize = Vec::new();
    distribution_samples(
        &format!("{METRIC_PREFIX}csize"),
        &[],
        &overall.consumed_size,
        &mut csize,
    );
    out.push(MetricFamily {
        name: format!("{METRIC_PREFIX}csize"),
        help: "Overall consumed file size distribution",
        kind: distribution_kind(&overall.consumed_size),
        samples: csize,
    });

    if let Some(replication) = &overall.replication {
        let mut samples = Vec::new();
        distribution_samples(
            &format!("{METRIC_PREFIX}replication"),
            &[],
            replication,
            &mut samples,
        );
        out.push(MetricFamily {
            name: format!("{METRIC_PREFIX}replication"),
            help: "Overall file replication",
            kind: MetricKind::Summary,
            samples,
        });
    }
}

fn scope_families(
    out: &mut Vec<MetricFamily>,
    scope: &str,
    label: &'static str,
    map: &DashMap<String, Stats>,
    with_replication: bool,
) {
    if map.is_empty() {
        return;
    }
    let mut keys: Vec<String> = map.iter().map(|entry| entry.key().clone()).collect();
    keys.sort();

    let mut dirs = Vec::new();
    let mut blocks = Vec::new();
    let mut links = Vec::new();
    let mut fsize = Vec::new();
    let mut csize = Vec::new();
    let mut replication = Vec::new();
    let mut size_kind = None;

    for key in &keys {
        let Some(stats) = map.get(key) else {
            continue;
        };
        let labels = vec![(label, key.clone())];
        dirs.push(Sample {
            name: format!("{METRIC_PREFIX}{scope}dirs"),
            labels: labels.clone(),
            value: stats.directories.load(Ordering::Relaxed) as f64,
        });
        blocks.push(Sample {
            name: format!("{METRIC_PREFIX}{scope}blocks"),
            labels: labels.clone(),
            value: stats.blocks.load(Ordering::Relaxed) as f64,
        });
        links.push(Sample {
            name: format!("{METRIC_PREFIX}{scope}links"),
            labels: labels.clone(),
            value: stats.symlinks.load(Ordering::Relaxed) as f64,
        });
        size_kind.get_or_insert(distribution_kind(&stats.file_size));
        distribution_samples(
            &format!("{METRIC_PREFIX}{scope}fsize"),
            &labels,
            &stats.file_size,
            &mut fsize,
        );
        distribution_samples(
            &format!("{METRIC_PREFIX}{scope}csize"),
            &labels,
            &stats.consumed_size,
            &mut csize,
        );
        if let Some(dist) = &stats.replication {
            distribution_samples(
                &format!("{METRIC_PREFIX}{scope}replication"),
                &labels,
                dist,
                &mut replication,
            );
        }
    }

    out.push(MetricFamily {
        name: format!("{METRIC_PREFIX}{scope}dirs"),
        help: "Number of directories.",
        kind: MetricKind::Gauge,
        samples: dirs,
    });
    out.push(MetricFamily {
        name: format!("{METRIC_PREFIX}{scope}blocks"),
        help: "Number of blocks.",
        kind: MetricKind::Gauge,
        samples: blocks,
    });
    out.push(MetricFamily {
        name: format!("{METRIC_PREFIX}{scope}links"),
        help: "Number of sym links.",
        kind: MetricKind::Gauge,
        samples: links,
    });
    out.push(MetricFamily {
        name: format!("{METRIC_PREFIX}{scope}fsize"),
        help: "File size distribution.",
        kind: size_kind.unwrap_or(MetricKind::Histogram),
        samples: fsize,
    });
    out.push(MetricFamily {
        name: format!("{METRIC_PREFIX}{scope}csize"),
        help: "Consumed file size distribution.",
        kind: size_kind.unwrap_or(MetricKind::Histogram),
        samples: csize,
    });
    if with_replication {
        out.push(MetricFamily {
            name: format!("{METRIC_PREFIX}{scope}replication"),
            help: "File replication.",
            kind: MetricKind::Summary,
            samples: replication,
        });
    }
}

fn distribution_kind(dist: &SizeDistribution) -> MetricKind {
    match dist.kind() {
        DistributionKind::Bucketed => MetricKind::Histogram,
        DistributionKind::Summary => MetricKind::Summary,
    }
}

/// Appends the samples of one distribution series: cumulative `_bucket`
/// samples for the bucketed variant (with a trailing `+Inf`), then `_sum` and
/// `_count` for both variants.
fn distribution_samples(
    family: &str,
    labels: &[Label],
    dist: &SizeDistribution,
    out: &mut Vec<Sample>,
) {
    if let (Some(bounds), Some(cumulative)) = (dist.bounds(), dist.cumulative_counts()) {
        for (bound, count) in bounds.iter().zip(&cumulative) {
            let mut bucket_labels = labels.to_vec();
            bucket_labels.push(("le", bound.to_string()));
            out.push(Sample {
                name: format!("{family}_bucket"),
                labels: bucket_labels,
                value: *count as f64,
            });
        }
        let mut bucket_labels = labels.to_vec();
        bucket_labels.push(("le", "+Inf".to_owned()));
        out.push(Sample {
            name: format!("{family}_bucket"),
            labels: bucket_labels,
            value: dist.count() as f64,
        });
    }
    out.push(Sample {
        name: format!("{family}_sum"),
        labels: labels.to_vec(),
        value: dist.sum() as f64,
    });
    out.push(Sample {
        name: format!("{family}_count"),
        labels: labels.to_vec(),
        value: dist.count() as f64,
    });
}

fn plain_sample(name: &str, value: f64) -> Sample {
    Sample {
        name: name.to_owned(),
        labels: Vec::new(),
        value,
    }
}
