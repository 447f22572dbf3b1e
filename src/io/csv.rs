/*!
# Saving Sample Sets to CSV

Writes one row per tracer with the header `x,y,z,vx,vy,vz`. Enable via the `csv` feature.
*/

use std::fs::File;
use std::path::Path;

use csv::Writer;

use crate::error::{Result, TracerError};
use crate::tracers::SampleSet;

/// Column names, positions first.
pub const HEADER: [&str; 6] = ["x", "y", "z", "vx", "vy", "vz"];

/**
Saves a [`SampleSet`] as a CSV file at `path`, creating or truncating it.

# Examples

```rust
use hernquist_tracers::io::csv::save_sample_set;
use hernquist_tracers::tracers::SampleSet;
use ndarray::arr2;

let set = SampleSet {
    positions: arr2(&[[1.0, 2.0, 3.0]]),
    velocities: arr2(&[[10.0, 20.0, 30.0]]),
};
let path = std::env::temp_dir().join("tracers.csv");
save_sample_set(&set, &path)?;
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_sample_set(set: &SampleSet, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| TracerError::Io {
        context: format!("creating {}", path.display()),
        source: e,
    })?;
    let mut wtr = Writer::from_writer(file);
    wtr.write_record(HEADER)?;

    for (pos, vel) in set.positions.outer_iter().zip(set.velocities.outer_iter()) {
        let row: Vec<String> = pos.iter().chain(vel.iter()).map(|v| v.to_string()).collect();
        wtr.write_record(&row)?;
    }

    wtr.flush().map_err(|e| TracerError::Io {
        context: format!("flushing {}", path.display()),
        source: e,
    })?;
    Ok(())
}
