use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::bufread::GzDecoder;
use tracing::{debug, warn};

use crate::grid::{materialize, PrecipitationGrid};
use crate::header::{read_header, FileHeader, HeaderLayout};
use crate::payload::{read_payload, RawPayload};

/// `TrmmReader`
///
/// 3B4XRTファイルを開いてヘッダーを読み込み、要求に応じて格子データを読み込む。
/// ファイルはヘッダーや格子データを読み込むときだけ開き、読み込み後すぐに閉じる。
#[derive(Debug)]
pub struct TrmmReader {
    /// パス
    path: PathBuf,
    /// 圧縮形式
    compression: Compression,
    /// ヘッダー
    header: FileHeader,
    /// 降水量の格子データ
    ///
    /// 最初に`precipitation_grid`を呼び出したときに読み込む。
    precipitation: Option<PrecipitationGrid>,
}

impl TrmmReader {
    /// 3B4XRTファイルを開く
    ///
    /// パスの拡張子が`gz`の場合は、gzipで圧縮されたファイルとして扱う。
    ///
    /// # 引数
    ///
    /// * `path` - 開く3B4XRTファイルのパス
    ///
    /// # 戻り値
    ///
    /// `TrmmReader`
    pub fn open<P>(path: P) -> TrmmReaderResult<Self>
    where
        P: AsRef<Path>,
    {
        Self::open_with_layout(path, HeaderLayout::default())
    }

    /// ヘッダーのレイアウトを指定して、ファイルを開く
    ///
    /// # 引数
    ///
    /// * `path` - 開くファイルのパス
    /// * `layout` - ヘッダーのレイアウト
    pub fn open_with_layout<P>(path: P, layout: HeaderLayout) -> TrmmReaderResult<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_owned();
        let compression = Compression::from_path(&path);
        let mut source = Source::open(&path, compression)?;
        let header = read_header(&mut source, &layout)?;
        debug!(
            "{}のヘッダーを読み込みました。格子数: {}x{}、変数の数: {}",
            path.display(),
            header.width(),
            header.height(),
            header.number_of_variables()
        );
        if compression == Compression::None {
            check_file_length(&path, &header)?;
        }

        Ok(Self {
            path,
            compression,
            header,
            precipitation: None,
        })
    }

    /// プロダクトを指定して、ファイルを開く
    ///
    /// ヘッダーのアルゴリズム識別子がプロダクトと一致しない場合は、警告を出力して読み込みを続ける。
    ///
    /// # 引数
    ///
    /// * `path` - 開くファイルのパス
    /// * `product` - ファイルに記録されているはずのプロダクト
    pub fn open_product<P>(path: P, product: Product) -> TrmmReaderResult<Self>
    where
        P: AsRef<Path>,
    {
        let reader = Self::open(path)?;
        match reader.header.algorithm_id() {
            Some(id) if id == product.algorithm_id() => {}
            Some(id) => warn!(
                "{}は{}ファイルではないようです。ヘッダーのアルゴリズム識別子は{}です。",
                reader.path.display(),
                product.algorithm_id(),
                id
            ),
            None => warn!(
                "{}にアルゴリズム識別子が記録されていないため、{}ファイルとして読み込みます。",
                reader.path.display(),
                product.algorithm_id()
            ),
        }

        Ok(reader)
    }

    /// ファイルのパスを返す。
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ヘッダーを返す。
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// ヘッダーのアルゴリズム識別子からプロダクトを返す。
    pub fn product(&self) -> Option<Product> {
        self.header
            .algorithm_id()
            .and_then(Product::from_algorithm_id)
    }

    /// 降水量（mm/hr）の格子データを返す。
    ///
    /// 最初の呼び出しでファイルから読み込み、以降は読み込んだ格子データを返す。
    pub fn precipitation_grid(&mut self) -> TrmmReaderResult<&PrecipitationGrid> {
        let grid = match self.precipitation.take() {
            Some(grid) => grid,
            None => self.variable_grid(PRECIPITATION_INDEX)?,
        };

        Ok(&*self.precipitation.insert(grid))
    }

    /// 変数をスケーリングして、欠測値をマスクした格子データを返す。
    ///
    /// 呼び出すたびにファイルから読み込む。
    ///
    /// # 引数
    ///
    /// * `index` - ファイルに記録されている順番（0から）
    pub fn variable_grid(&self, index: usize) -> TrmmReaderResult<PrecipitationGrid> {
        let raw = self.raw_field(index)?;
        let variable = &self.header.variables()[index];

        Ok(materialize(
            &raw,
            variable.scale_factor,
            self.header.flag_value(),
        ))
    }

    /// プロダクトの変数を指定して、格子データを返す。
    ///
    /// プロダクトはヘッダーのアルゴリズム識別子から判定し、判定できない場合は3B42RTとみなす。
    pub fn variable_grid_by(&self, variable: Variable) -> TrmmReaderResult<PrecipitationGrid> {
        let product = self.product().unwrap_or(Product::B42RT);
        let index = product
            .variable_index(variable)
            .ok_or(TrmmReaderError::VariableNotRecorded(variable))?;

        self.variable_grid(index)
    }

    /// 変数をスケーリングせず、欠測値もマスクしないで返す。
    ///
    /// # 引数
    ///
    /// * `index` - ファイルに記録されている順番（0から）
    pub fn raw_field(&self, index: usize) -> TrmmReaderResult<RawPayload> {
        let count = self.header.number_of_variables();
        let (offset, variable) = match (
            self.header.variable_offset(index),
            self.header.variables().get(index),
        ) {
            (Some(offset), Some(variable)) => (offset, variable),
            _ => return Err(TrmmReaderError::VariableOutOfRange { index, count }),
        };

        let end = offset + self.header.variable_bytes(index).unwrap_or(0) as u64;

        let mut source = Source::open(&self.path, self.compression)?;
        source.ensure_length(end)?;
        source.skip(offset)?;
        let payload = read_payload(
            &mut source,
            self.header.width(),
            self.header.height(),
            variable.element_size,
            self.header.byte_order(),
        )?;
        debug!(
            "{}から変数{index}を読み込みました。開始位置: {offset}",
            self.path.display()
        );

        Ok(payload)
    }
}

/// 降水量は最初の変数として記録されている。
const PRECIPITATION_INDEX: usize = 0;

/// 3B4XRTプロダクト
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Product {
    /// マイクロ波による降水量
    B40RT,
    /// 赤外による降水量
    B41RT,
    /// マイクロ波と赤外を合成した降水量
    B42RT,
}

impl Product {
    /// ヘッダーに記録されるアルゴリズム識別子を返す。
    pub const fn algorithm_id(self) -> &'static str {
        match self {
            Self::B40RT => "3B40RT",
            Self::B41RT => "3B41RT",
            Self::B42RT => "3B42RT",
        }
    }

    /// アルゴリズム識別子からプロダクトを返す。
    pub fn from_algorithm_id(id: &str) -> Option<Self> {
        match id.trim() {
            "3B40RT" => Some(Self::B40RT),
            "3B41RT" => Some(Self::B41RT),
            "3B42RT" => Some(Self::B42RT),
            _ => None,
        }
    }

    /// 記録順の変数を返す。
    pub const fn variables(self) -> &'static [Variable] {
        match self {
            Self::B40RT => &[
                Variable::Precipitation,
                Variable::PrecipitationError,
                Variable::TotalPixels,
                Variable::AmbiguousPixels,
                Variable::RainPixels,
                Variable::Source,
            ],
            Self::B41RT => &[
                Variable::Precipitation,
                Variable::PrecipitationError,
                Variable::TotalPixels,
            ],
            Self::B42RT => &[
                Variable::Precipitation,
                Variable::PrecipitationError,
                Variable::Source,
                Variable::UncalibratedPrecipitation,
            ],
        }
    }

    /// 変数が記録されている順番を返す。
    pub fn variable_index(self, variable: Variable) -> Option<usize> {
        self.variables().iter().position(|&v| v == variable)
    }
}

/// 3B4XRTファイルに記録される変数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variable {
    /// 降水量（mm/hr）
    Precipitation,
    /// 降水量の二乗平均平方根誤差の推定値（mm/hr）
    PrecipitationError,
    /// 全画素数
    TotalPixels,
    /// 曖昧な画素数
    AmbiguousPixels,
    /// 降水画素数
    RainPixels,
    /// データ・ソースの識別子
    Source,
    /// 較正していない降水量（mm/hr）
    UncalibratedPrecipitation,
}

/// 圧縮形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
}

impl Compression {
    fn from_path(path: &Path) -> Self {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("gz") => Self::Gzip,
            _ => Self::None,
        }
    }
}

/// 圧縮形式に応じたファイル・リーダー
enum Source {
    Plain(BufReader<File>),
    Gzip(GzDecoder<BufReader<File>>),
}

impl Source {
    fn open(path: &Path, compression: Compression) -> TrmmReaderResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| TrmmReaderError::Open(format!("{}: {e}", path.display())))?;
        let reader = BufReader::new(file);

        Ok(match compression {
            Compression::None => Self::Plain(reader),
            Compression::Gzip => Self::Gzip(GzDecoder::new(reader)),
        })
    }

    /// 圧縮されていないファイルが`end`バイト以上あるか確認する。
    ///
    /// 圧縮されたファイルは展開後の大きさが分からないため、読み込み時に確認する。
    fn ensure_length(&self, end: u64) -> TrmmReaderResult<()> {
        let Self::Plain(reader) = self else {
            return Ok(());
        };
        let actual = reader
            .get_ref()
            .metadata()
            .map_err(|e| {
                TrmmReaderError::Unexpected(format!("ファイルの大きさを取得できません。{e}"))
            })?
            .len();
        if actual < end {
            return Err(TrmmReaderError::Truncated(format!(
                "変数の末尾({end}バイト)より前にファイルが終了しています。ファイルの大きさ: {actual}バイト"
            )));
        }

        Ok(())
    }

    /// 読み込み位置をファイルの先頭から`offset`バイトの位置に移動する。
    ///
    /// 読み込み位置はファイルの先頭にあることを想定している。
    fn skip(&mut self, offset: u64) -> TrmmReaderResult<()> {
        match self {
            Self::Plain(reader) => {
                reader.seek(SeekFrom::Start(offset)).map_err(|e| {
                    TrmmReaderError::Unexpected(format!(
                        "データ部へのシークに失敗しました。{e}"
                    ))
                })?;
            }
            Self::Gzip(reader) => {
                let skipped = io::copy(&mut reader.by_ref().take(offset), &mut io::sink())
                    .map_err(|e| {
                        TrmmReaderError::Unexpected(format!(
                            "圧縮データの展開に失敗しました。{e}"
                        ))
                    })?;
                if skipped < offset {
                    return Err(TrmmReaderError::Truncated(format!(
                        "データ部の開始位置({offset}バイト)より前にファイルが終了しました。"
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(reader) => reader.read(buf),
            Self::Gzip(reader) => reader.read(buf),
        }
    }
}

/// ファイルのサイズが、ヘッダーから求めたサイズと一致するか確認する。
///
/// 短いファイルは変数を読み込むときに`TrmmReaderError::Truncated`とし、ここでは警告だけを出力する。
fn check_file_length(path: &Path, header: &FileHeader) -> TrmmReaderResult<()> {
    let actual = std::fs::metadata(path)
        .map_err(|e| TrmmReaderError::Open(format!("{}: {e}", path.display())))?
        .len();
    let expected = header.expected_file_bytes();
    if actual < expected {
        warn!(
            "{}は{expected}バイト必要ですが、{actual}バイトしかありません。",
            path.display()
        );
    } else if expected < actual {
        warn!(
            "{}の末尾{}バイトは読み込みません。",
            path.display(),
            actual - expected
        );
    }

    Ok(())
}

/// TrmmReaderエラー型
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrmmReaderError {
    /// 予期しない例外
    #[error("{0}")]
    Unexpected(String),

    /// ファイル・オープン・エラー
    #[error("ファイルを開くときにエラーが発生しました。{0}")]
    Open(String),

    /// ファイルがヘッダーや格子データに必要な大きさより短い
    #[error("ファイルが途中で終了しています。{0}")]
    Truncated(String),

    /// ヘッダーの項目が不正、またはサポートしていないデータ型やバイト・オーダー
    #[error("ファイルの形式が不正です。{0}")]
    Format(String),

    /// ファイルに記録されていない変数の番号
    #[error("変数{index}は読み込めません。ファイルには{count}個の変数が記録されています。")]
    VariableOutOfRange { index: usize, count: usize },

    /// プロダクトに存在しない変数
    #[error("プロダクトに変数`{0:?}`は記録されていません。")]
    VariableNotRecorded(Variable),
}

/// TrmmReader結果型
pub type TrmmReaderResult<T> = Result<T, TrmmReaderError>;

/// バイト列を読み込む。
///
/// バイト列を満たす前にファイルが終了した場合は`TrmmReaderError::Truncated`を返す。
///
/// # 引数
///
/// * `reader` - バイト列を読み込むリーダー
/// * `buf` - 読み込んだバイト列を格納するバッファ
/// * `what` - エラー・メッセージに含める読み込み対象の名前
pub(crate) fn read_exact_or_truncated<R>(
    reader: &mut R,
    buf: &mut [u8],
    what: &str,
) -> TrmmReaderResult<()>
where
    R: Read,
{
    let bytes = buf.len();
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => TrmmReaderError::Truncated(format!(
            "{what}の{bytes}バイトを読み込めませんでした。"
        )),
        _ => TrmmReaderError::Unexpected(format!(
            "ファイルから{what}の{bytes}バイトの読み込みに失敗しました。{e}"
        )),
    })
}
