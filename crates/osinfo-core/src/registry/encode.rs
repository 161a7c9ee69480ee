//! Prometheus text exposition format (version 0.0.4).

use std::fmt::Write;

use super::FamilyView;

/// `Content-Type` header value for the text format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// Accumulates exposition text into one buffer.
#[derive(Debug, Default)]
pub struct TextEncoder {
    out: String,
}

impl TextEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `# HELP` and `# TYPE` lines.
    pub fn header(&mut self, name: &str, help: &str, kind: MetricKind) {
        let _ = writeln!(self.out, "# HELP {} {}", name, escape_help(help));
        let _ = writeln!(self.out, "# TYPE {} {}", name, kind.as_str());
    }

    /// Writes one sample line.
    pub fn sample<'a, I>(&mut self, name: &str, labels: I, value: f64)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.out.push_str(name);
        let mut first = true;
        for (label, label_value) in labels {
            self.out.push(if first { '{' } else { ',' });
            first = false;
            self.out.push_str(label);
            self.out.push_str("=\"");
            push_escaped_label_value(&mut self.out, label_value);
            self.out.push('"');
        }
        if !first {
            self.out.push('}');
        }
        self.out.push(' ');
        self.out.push_str(&format_value(value));
        self.out.push('\n');
    }

    /// Writes a whole family: header plus one line per series.
    pub fn family(&mut self, view: &FamilyView) {
        let desc = view.desc();
        self.header(desc.name(), desc.help(), MetricKind::Gauge);
        for (tuple, value) in view.series() {
            let labels = desc
                .label_names()
                .iter()
                .map(String::as_str)
                .zip(tuple.values().iter().map(String::as_str));
            self.sample(desc.name(), labels, *value);
        }
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Encodes a set of family views.
pub fn encode_families(views: &[FamilyView]) -> String {
    let mut encoder = TextEncoder::new();
    for view in views {
        encoder.family(view);
    }
    encoder.finish()
}

fn push_escaped_label_value(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let inf = if value > 0.0 { "+Inf" } else { "-Inf" };
        inf.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FamilyDesc, LabelTuple, Registry};

    #[test]
    fn test_encode_family() {
        let mut builder = Registry::builder();
        let family = builder
            .register(FamilyDesc::new(
                "system_process_info",
                "Information about running processes",
                &["pid", "name", "user"],
            ))
            .unwrap();
        family.set(LabelTuple::from(["1", "init", "root"]), 1.0).unwrap();
        family.set(LabelTuple::from(["99", "cron", "root"]), 1.0).unwrap();

        let text = encode_families(&builder.build().export());
        assert_eq!(
            text,
            "# HELP system_process_info Information about running processes\n\
             # TYPE system_process_info gauge\n\
             system_process_info{pid=\"1\",name=\"init\",user=\"root\"} 1\n\
             system_process_info{pid=\"99\",name=\"cron\",user=\"root\"} 1\n"
        );
    }

    #[test]
    fn test_encode_escapes_label_values() {
        let mut encoder = TextEncoder::new();
        encoder.sample("m", [("path", "C:\\dir \"x\"\nnext")], 0.0);
        assert_eq!(encoder.finish(), "m{path=\"C:\\\\dir \\\"x\\\"\\nnext\"} 0\n");
    }

    #[test]
    fn test_encode_without_labels() {
        let mut encoder = TextEncoder::new();
        encoder.header("up", "Exporter is up", MetricKind::Gauge);
        encoder.sample("up", std::iter::empty(), 1.0);
        assert_eq!(
            encoder.finish(),
            "# HELP up Exporter is up\n# TYPE up gauge\nup 1\n"
        );
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(1.0), "1");
        assert_eq!(format_value(0.25), "0.25");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NAN), "NaN");
    }
}
