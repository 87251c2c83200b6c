use anyhow::Context;
use serde::Serialize;
use std::fmt::Write;
use std::fs::OpenOptions;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

/// EntrantResult contains the lap bookkeeping of one entrant.
#[derive(Debug, Serialize, Clone)]
pub struct EntrantResult {
    pub name: String,
    pub laps: u32,
    pub lap_times: Vec<f64>,
    pub best_lap: Option<f64>,
    pub total_time: f64,
    pub finished: bool,
    pub wall_hits: u32,
}

/// SessionResult contains all session information that is required for post-processing the
/// results.
#[derive(Debug, Serialize, Clone)]
pub struct SessionResult {
    pub track_name: String,
    pub tot_no_laps: u32,
    pub sim_time: f64,
    pub entrants: Vec<EntrantResult>,
}

impl SessionResult {
    /// format_lap_times creates the lap time table. Laps that were not driven are left empty.
    pub fn format_lap_times(&self) -> Result<String, std::fmt::Error> {
        let mut content = String::new();

        // header
        write!(&mut content, "lap")?;
        for entrant in self.entrants.iter() {
            write!(&mut content, ", {:>12}", entrant.name)?;
        }
        writeln!(&mut content)?;

        // lap times
        for lap in 0..self.tot_no_laps as usize {
            write!(&mut content, "{:3}", lap + 1)?;
            for entrant in self.entrants.iter() {
                match entrant.lap_times.get(lap) {
                    Some(lap_time) => write!(&mut content, ", {:11.3}s", lap_time)?,
                    None => write!(&mut content, ", {:>12}", "-")?,
                }
            }
            writeln!(&mut content)?;
        }

        // best and total times
        write!(&mut content, "best")?;
        for entrant in self.entrants.iter() {
            match entrant.best_lap {
                Some(best) => write!(&mut content, ",{:11.3}s", best)?,
                None => write!(&mut content, ",{:>12}", "-")?,
            }
        }
        writeln!(&mut content)?;

        write!(&mut content, "total")?;
        for entrant in self.entrants.iter() {
            if entrant.finished {
                write!(&mut content, ",{:10.3}s", entrant.total_time)?;
            } else {
                write!(&mut content, ",{:>11}", "DNF")?;
            }
        }
        writeln!(&mut content)?;

        Ok(content)
    }

    /// print_lap_times prints the resulting lap times to the console output.
    pub fn print_lap_times(&self) {
        println!(
            "RESULT: Lap times on {} after {:.3}s",
            self.track_name, self.sim_time
        );
        match self.format_lap_times() {
            Ok(table) => println!("{}", table),
            Err(_) => println!("RESULT: Could not format lap times!"),
        }
    }

    /// write_lap_times_to_file writes the lap time table to a text file (default
    /// output/last_run.txt) and returns the path of the written file.
    pub fn write_lap_times_to_file(&self, path: Option<&Path>) -> anyhow::Result<PathBuf> {
        let mut content = String::new();
        writeln!(
            &mut content,
            "RESULT: Lap times on {} after {:.3}s",
            self.track_name, self.sim_time
        )?;
        content.push_str(&self.format_lap_times()?);

        let out_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let out_dir = Path::new("output");
                std::fs::create_dir_all(out_dir).context("Failed to create output directory!")?;
                out_dir.join("last_run.txt")
            }
        };

        let mut fh = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&out_path)
            .context(format!(
                "Failed to open result file {}!",
                out_path.to_string_lossy()
            ))?;
        fh.write_all(content.as_bytes())?;
        fh.flush()?;

        Ok(out_path)
    }

    /// write_json writes the complete result as JSON.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let fh = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)
            .context(format!(
                "Failed to open result file {}!",
                path.to_string_lossy()
            ))?;
        serde_json::to_writer_pretty(fh, self).context("Failed to serialize session result!")?;
        Ok(())
    }
}
