use std::fs;
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::IrwError;

/// Writes `dest` through a temp file in the same directory, then renames it into place.
///
/// An existing `dest` is an error unless `overwrite` is set.
pub fn write_atomic<F>(dest: &Utf8Path, overwrite: bool, fill: F) -> Result<(), IrwError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), IrwError>,
{
    if dest.as_std_path().exists() && !overwrite {
        return Err(IrwError::FileExists(dest.as_std_path().to_path_buf()));
    }
    let parent = match dest.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| IrwError::Filesystem(format!("create {parent}: {err}")))?;
    let temp = tempfile::Builder::new()
        .prefix(".irw-")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| IrwError::Filesystem(err.to_string()))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        fill(&mut writer)?;
        writer
            .flush()
            .map_err(|err| IrwError::Filesystem(err.to_string()))?;
    }
    temp.persist(dest.as_std_path())
        .map_err(|err| IrwError::Filesystem(format!("write {dest}: {}", err.error)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn refuses_to_clobber_without_overwrite() {
        let temp = tempfile::tempdir().unwrap();
        let dest = Utf8PathBuf::from_path_buf(temp.path().join("out.csv")).unwrap();
        write_atomic(&dest, false, |w| {
            w.write_all(b"a\n").map_err(|err| IrwError::Filesystem(err.to_string()))
        })
        .unwrap();
        assert_matches!(
            write_atomic(&dest, false, |_| Ok(())),
            Err(IrwError::FileExists(_))
        );
        write_atomic(&dest, true, |w| {
            w.write_all(b"b\n").map_err(|err| IrwError::Filesystem(err.to_string()))
        })
        .unwrap();
        assert_eq!(fs::read_to_string(dest.as_std_path()).unwrap(), "b\n");
    }
}
