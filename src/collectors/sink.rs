use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Name and help of a published metric. `source` names the upstream value it
/// is read from (a CloudWatch metric, a JSON pointer), if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricDesc {
    pub name: String,
    pub help: String,
    pub source: Option<String>,
}

impl MetricDesc {
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// One complete value written to the output stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub name: String,
    pub help: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl Sample {
    pub fn new(desc: &MetricDesc, value: f64) -> Self {
        Self {
            name: desc.name.clone(),
            help: desc.help.clone(),
            labels: BTreeMap::new(),
            value,
        }
    }

    #[must_use]
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }
}

/// Shared output stream. Clones write to the same stream; every `send` is a
/// whole sample, so concurrent writers never interleave.
#[derive(Clone, Debug)]
pub struct MetricSink {
    tx: mpsc::UnboundedSender<Sample>,
}

/// Receiving half of a [`MetricSink`].
#[derive(Debug)]
pub struct SampleStream {
    rx: mpsc::UnboundedReceiver<Sample>,
}

impl MetricSink {
    pub fn channel() -> (Self, SampleStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, SampleStream { rx })
    }

    pub fn send(&self, sample: Sample) {
        if let Err(e) = self.tx.send(sample) {
            debug!(metric = %e.0.name, "sample dropped, stream closed");
        }
    }
}

impl SampleStream {
    /// Everything sent so far, in arrival order.
    pub fn drain(&mut self) -> Vec<Sample> {
        let mut samples = Vec::new();
        while let Ok(sample) = self.rx.try_recv() {
            samples.push(sample);
        }
        samples
    }
}
