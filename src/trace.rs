use crate::uop::Uop;
use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

pub type Ref = Arc<Mutex<Tracer>>;

/// Sink for the pipeline trace.
///
/// Every stage transition, stall and work-group event is written as one
/// line of `key=value` pairs.
#[derive(Default)]
pub struct Tracer {
    writer: Option<Box<dyn Write + Send>>,
    lines: Option<Vec<String>>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("writer", &self.writer.is_some())
            .field("lines", &self.lines.as_ref().map(Vec::len))
            .finish()
    }
}

impl Tracer {
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Some(Box::new(writer)),
            lines: None,
        }
    }

    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = std::fs::File::create(path.as_ref())?;
        Ok(Self::new(std::io::BufWriter::new(file)))
    }

    /// Keep all trace lines in memory.
    #[must_use]
    pub fn buffered() -> Self {
        Self {
            writer: None,
            lines: Some(Vec::new()),
        }
    }

    #[must_use]
    pub fn into_ref(self) -> Ref {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.writer.is_some() || self.lines.is_some()
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        self.lines.as_deref().unwrap_or_default()
    }

    pub fn line(&mut self, args: std::fmt::Arguments) {
        if let Some(ref mut writer) = self.writer {
            if let Err(err) = writer.write_fmt(args).and_then(|()| writer.write_all(b"\n")) {
                log::warn!("disabling trace: {err}");
                self.writer = None;
            }
        }
        if let Some(ref mut lines) = self.lines {
            lines.push(args.to_string());
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match self.writer {
            Some(ref mut writer) => writer.flush(),
            None => Ok(()),
        }
    }

    pub fn cycle(&mut self, cycle: u64) {
        if self.is_active() {
            self.line(format_args!("c clk={cycle}"));
        }
    }

    /// Trace a uop entering the stage `stage`.
    pub fn stage(&mut self, uop: &Uop, stage: &str) {
        if self.is_active() {
            self.line(format_args!(
                "si.inst id={} cu={} wf={} uop_id={} stg=\"{}\"",
                uop.id_in_compute_unit,
                uop.compute_unit_id,
                uop.wavefront_id,
                uop.id_in_wavefront,
                stage
            ));
        }
    }

    /// Trace a uop that could not leave its stage.
    pub fn stall(&mut self, uop: &Uop) {
        self.stage(uop, "s");
    }

    pub fn new_instruction(&mut self, uop: &Uop, pool: usize) {
        if self.is_active() {
            self.line(format_args!(
                "si.new_inst id={} cu={} ib={} wg={} wf={} uop_id={} stg=\"f\" asm=\"{}\"",
                uop.id_in_compute_unit,
                uop.compute_unit_id,
                pool,
                uop.work_group_id,
                uop.wavefront_id,
                uop.id_in_wavefront,
                uop.instruction
            ));
        }
    }

    pub fn end_instruction(&mut self, uop: &Uop) {
        if self.is_active() {
            self.line(format_args!(
                "si.end_inst id={} cu={}",
                uop.id_in_compute_unit, uop.compute_unit_id
            ));
        }
    }
}
