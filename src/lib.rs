//! TRMM 3B4XRT（3B40RT、3B41RT、3B42RT）ファイル・リーダー
//!
//! ファイルの先頭に記録されたASCIIヘッダーを読み込み、続くデータ部の整数を
//! 降水量（mm/hr）の格子データに変換する。
//!
//! ```no_run
//! use trmm_rt::TrmmReader;
//!
//! let mut reader = TrmmReader::open("3B42RT.2008010103.7R2.bin.gz")?;
//! println!("{}", reader.header().timestamp());
//! let grid = reader.precipitation_grid()?;
//! println!("{:?}", grid.shape());
//! # Ok::<(), trmm_rt::TrmmReaderError>(())
//! ```

pub mod grid;
pub mod header;
pub mod payload;
pub mod readers;

pub use grid::{GridStatistics, PrecipitationGrid, MISSING_VALUE};
pub use header::{FileHeader, HeaderLayout, VariableLayout, HEADER_BYTES};
pub use payload::{ByteOrder, ElementSize, RawPayload};
pub use readers::{Product, TrmmReader, TrmmReaderError, TrmmReaderResult, Variable};
