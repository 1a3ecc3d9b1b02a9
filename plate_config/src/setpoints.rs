//! Well coordinate lists: CSV loading/writing and serpentine grid generation.
use std::io::Write;
use std::path::Path;

/// One target position for the camera, in millimetres from the home corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub x_mm: f64,
    pub y_mm: f64,
}

impl Setpoint {
    #[must_use]
    pub const fn new(x_mm: f64, y_mm: f64) -> Self {
        Self { x_mm, y_mm }
    }
}

/// Plate geometry for [`generate_grid`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub rows: usize,
    pub columns: usize,
    pub initial_offset_x_mm: f64,
    pub initial_offset_y_mm: f64,
    pub pitch_x_mm: f64,
    pub pitch_y_mm: f64,
    /// Added to X wherever the carriage approaches a well from the far side.
    pub hysteresis_mm: f64,
}

impl Default for GridSpec {
    /// 96-well plate, 9 mm pitch.
    fn default() -> Self {
        Self {
            rows: 8,
            columns: 12,
            initial_offset_x_mm: 0.0,
            initial_offset_y_mm: 0.0,
            pitch_x_mm: 108.0 / 12.0,
            pitch_y_mm: 108.0 / 12.0,
            hysteresis_mm: 2.5,
        }
    }
}

fn round_centi(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Serpentine traversal: even rows left to right, odd rows right to left.
///
/// X backlash is compensated by adding `hysteresis_mm` on every column of an
/// odd row except the last, and on column 0 of every even row after the first.
#[must_use]
pub fn generate_grid(spec: &GridSpec) -> Vec<Setpoint> {
    let mut out = Vec::with_capacity(spec.rows * spec.columns);
    for row in 0..spec.rows {
        let odd = row % 2 != 0;
        #[allow(clippy::cast_precision_loss)]
        let y = round_centi(row as f64 * spec.pitch_y_mm + spec.initial_offset_y_mm);
        let mut line: Vec<Setpoint> = (0..spec.columns)
            .map(|col| {
                #[allow(clippy::cast_precision_loss)]
                let base = spec.initial_offset_x_mm + col as f64 * spec.pitch_x_mm;
                let compensate = if odd {
                    col != spec.columns - 1
                } else {
                    col == 0 && row != 0
                };
                let x = if compensate {
                    base + spec.hysteresis_mm
                } else {
                    base
                };
                Setpoint::new(round_centi(x), y)
            })
            .collect();
        if odd {
            line.reverse();
        }
        out.extend(line);
    }
    out
}

/// Load `x_mm, y_mm` rows. No header; `#` lines are skipped.
pub fn load_setpoints_csv(path: &Path) -> eyre::Result<Vec<Setpoint>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .flexible(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open setpoints CSV {:?}: {}", path, e))?;

    let mut out = Vec::new();
    for rec in rdr.records() {
        let rec = rec.map_err(|e| {
            let line = e.position().map_or(0, csv::Position::line);
            eyre::eyre!("invalid setpoints row {}: {}", line, e)
        })?;
        let line = rec.position().map_or(0, csv::Position::line);
        if rec.iter().all(str::is_empty) {
            continue;
        }
        if rec.len() != 2 {
            eyre::bail!(
                "invalid setpoints row {}: expected 2 columns (x_mm, y_mm), got {}",
                line,
                rec.len()
            );
        }
        let parse = |field: &str, name: &str| -> eyre::Result<f64> {
            let v: f64 = field
                .parse()
                .map_err(|e| eyre::eyre!("invalid setpoints row {line}: {name} {field:?}: {e}"))?;
            if !v.is_finite() {
                eyre::bail!("invalid setpoints row {line}: {name} must be finite");
            }
            Ok(v)
        };
        out.push(Setpoint::new(parse(&rec[0], "x_mm")?, parse(&rec[1], "y_mm")?));
    }
    if out.is_empty() {
        eyre::bail!("setpoints CSV {:?} contains no rows", path);
    }
    Ok(out)
}

/// Write one `x, y` line per setpoint.
pub fn write_setpoints_csv(path: &Path, points: &[Setpoint]) -> eyre::Result<()> {
    let file = std::fs::File::create(path)
        .map_err(|e| eyre::eyre!("create setpoints CSV {:?}: {}", path, e))?;
    let mut w = std::io::BufWriter::new(file);
    for p in points {
        writeln!(w, "{}, {}", p.x_mm, p.y_mm)?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xs(points: &[Setpoint]) -> Vec<f64> {
        points.iter().map(|p| p.x_mm).collect()
    }

    #[test]
    fn serpentine_rows_with_hysteresis() {
        let spec = GridSpec {
            rows: 3,
            columns: 3,
            pitch_x_mm: 10.0,
            pitch_y_mm: 5.0,
            hysteresis_mm: 1.0,
            ..GridSpec::default()
        };
        let g = generate_grid(&spec);
        assert_eq!(g.len(), 9);
        assert_eq!(xs(&g[0..3]), vec![0.0, 10.0, 20.0]);
        // odd row: reversed, all but the last column compensated
        assert_eq!(xs(&g[3..6]), vec![20.0, 11.0, 1.0]);
        // even row after the first: column 0 compensated
        assert_eq!(xs(&g[6..9]), vec![1.0, 10.0, 20.0]);
        assert!(g[3..6].iter().all(|p| (p.y_mm - 5.0).abs() < 1e-9));
    }

    #[test]
    fn default_grid_is_96_wells() {
        let g = generate_grid(&GridSpec::default());
        assert_eq!(g.len(), 96);
        assert_eq!(g[0], Setpoint::new(0.0, 0.0));
        assert_eq!(g[12], Setpoint::new(99.0, 9.0));
        assert_eq!(g[95].y_mm, 63.0);
    }

    #[test]
    fn rounds_to_hundredths() {
        let spec = GridSpec {
            rows: 1,
            columns: 2,
            pitch_x_mm: 1.0 / 3.0,
            hysteresis_mm: 0.0,
            ..GridSpec::default()
        };
        assert_eq!(generate_grid(&spec)[1].x_mm, 0.33);
    }
}
