//! Output helpers for binaries.

/// Create a directory and all its parents, returning `std::io::Result<()>`.
/// Does nothing if the directory already exists.
#[macro_export]
macro_rules! mkdir {
    ( $dir:expr ) => {
        std::fs::create_dir_all($dir.as_path())
    };
}

/// Write a set of named arrays to a single `.npz` file, returning
/// `std::io::Result<()>`.
///
/// ```ignore
/// write_npz!(
///     outdir.join("run.npz"),
///     arrays: {
///         "pulse" => &pulse,
///         "cost" => &cost,
///     }
/// )?;
/// ```
#[macro_export]
macro_rules! write_npz {
    (
        $filename:expr,
        arrays: { $( $name:expr => $arr:expr ),+ $(,)? }
    ) => {
        (|| -> std::io::Result<()> {
            let npz_err = |err: $crate::ndarray_npy::WriteNpzError| {
                std::io::Error::new(std::io::ErrorKind::Other, err)
            };
            let file = std::fs::File::create($filename)?;
            let mut npz = $crate::ndarray_npy::NpzWriter::new(file);
            $( npz.add_array($name, $arr).map_err(npz_err)?; )+
            npz.finish().map_err(npz_err)?;
            Ok(())
        })()
    };
}
