//! Metrics definitions for the flag resolver.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

macro_rules! counter {
    ($def:expr) => {
        ::metrics::counter!($def.name)
    };
}

macro_rules! histogram {
    ($def:expr) => {
        ::metrics::histogram!($def.name)
    };
}

pub(crate) use counter;
pub(crate) use histogram;

pub const MEMO_CACHE_HIT: MetricDef = MetricDef {
    name: "memo_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of flag resolutions served from the memo cache",
};

pub const MEMO_CACHE_MISS: MetricDef = MetricDef {
    name: "memo_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of memoized flag resolutions that had to build a descriptor",
};

pub const RESOLVE_RELAY: MetricDef = MetricDef {
    name: "resolve.relay",
    metric_type: MetricType::Counter,
    description: "Number of relay descriptors produced",
};

pub const RECEIVE_OK: MetricDef = MetricDef {
    name: "receive.ok",
    metric_type: MetricType::Counter,
    description: "Number of payloads accepted by the resolution state",
};

pub const RECEIVE_INVALID: MetricDef = MetricDef {
    name: "receive.invalid",
    metric_type: MetricType::Counter,
    description: "Number of payloads rejected as empty or not a list",
};

pub const RECEIVE_ERROR: MetricDef = MetricDef {
    name: "receive.error",
    metric_type: MetricType::Counter,
    description: "Number of explicitly reported fetch failures",
};

pub const FETCH_DURATION: MetricDef = MetricDef {
    name: "fetch.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fetch the feature payload in seconds",
};

pub const FETCH_RECORDS: MetricDef = MetricDef {
    name: "fetch.records",
    metric_type: MetricType::Histogram,
    description: "Number of raw records in an accepted payload",
};

pub const ALL_METRICS: &[MetricDef] = &[
    MEMO_CACHE_HIT,
    MEMO_CACHE_MISS,
    RESOLVE_RELAY,
    RECEIVE_OK,
    RECEIVE_INVALID,
    RECEIVE_ERROR,
    FETCH_DURATION,
    FETCH_RECORDS,
];

/// Registers the description of every metric with the installed recorder.
pub fn describe_all() {
    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}
