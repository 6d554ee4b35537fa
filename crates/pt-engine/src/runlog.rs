// Textual run log
// Human-readable record of every evaluation and generation, kept next to the outputs

use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use pt_optimizer::Distribution;
use pt_types::{CostMatrix, TuneResult};

#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl RunLog {
    /// Start a fresh log, truncating any previous one.
    pub fn create(path: impl AsRef<Path>) -> TuneResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Continue an existing log, as on resume.
    pub fn append(path: impl AsRef<Path>) -> TuneResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_block(&self, body: &str) -> TuneResult<()> {
        let mut writer = self.writer.lock();
        writeln!(writer, "[{}]", Utc::now().to_rfc3339())?;
        writer.write_all(body.as_bytes())?;
        writeln!(writer)?;
        Ok(())
    }

    pub fn evaluation(
        &self,
        wall_time: Duration,
        costs: &CostMatrix,
        references: &[f64],
    ) -> TuneResult<()> {
        let refs: Vec<String> = references.iter().map(|r| format!("{}", *r as i64)).collect();
        self.write_block(&format!(
            "Evaluation time: {:.2}s\nCosts:\n{}Reference costs: {}\n",
            wall_time.as_secs_f64(),
            costs,
            refs.join(" ")
        ))
    }

    pub fn generation(
        &self,
        generation: u64,
        ranked: &[(usize, f64)],
        distribution: &Distribution,
        elapsed: Duration,
    ) -> TuneResult<()> {
        let ranked: Vec<String> = ranked
            .iter()
            .map(|(candidate, score)| format!("({candidate}, {score:.4})"))
            .collect();
        self.write_block(&format!(
            "Generation {}\nRanked scores: {}\nMean: {:?}\nCovariance:{}Elapsed: {:.1}s\n",
            generation,
            ranked.join(" "),
            distribution.mean_vec(),
            distribution.covariance(),
            elapsed.as_secs_f64()
        ))
    }

    pub fn note(&self, message: &str) -> TuneResult<()> {
        self.write_block(message)
    }

    pub fn flush(&self) -> TuneResult<()> {
        self.writer.lock().flush()?;
        Ok(())
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        let _ = self.writer.get_mut().flush();
    }
}
