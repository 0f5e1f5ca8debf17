use std::io::Read;

use crate::readers::{TrmmReaderError, TrmmReaderResult};

/// バイト・オーダー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// ビッグ・エンディアン
    BigEndian,

    /// リトル・エンディアン
    LittleEndian,
}

impl ByteOrder {
    /// 実行中のホストのバイト・オーダーを返す。
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::BigEndian
        } else {
            Self::LittleEndian
        }
    }

    /// ヘッダーに記録するタグを返す。
    pub const fn tag(self) -> &'static str {
        match self {
            Self::BigEndian => "big_endian",
            Self::LittleEndian => "little_endian",
        }
    }
}

/// ヘッダーに記録されたバイト・オーダーのタグから`ByteOrder`に変換する。
///
/// 大文字と小文字は区別しない。
impl TryFrom<&str> for ByteOrder {
    type Error = TrmmReaderError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "big_endian" | "big" => Ok(Self::BigEndian),
            "little_endian" | "little" => Ok(Self::LittleEndian),
            _ => Err(TrmmReaderError::Format(format!(
                "サポートしていないバイト・オーダーです。`{value}`"
            ))),
        }
    }
}

/// 格子1つあたりのバイト数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementSize {
    /// 1バイト符号付き整数
    One = 1,

    /// 2バイト符号付き整数
    Two = 2,

    /// 4バイト符号付き整数
    Four = 4,
}

impl ElementSize {
    /// バイト数を返す。
    pub const fn bytes(self) -> usize {
        self as usize
    }
}

impl TryFrom<usize> for ElementSize {
    type Error = TrmmReaderError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            _ => Err(TrmmReaderError::Format(format!(
                "サポートしていないデータ型のサイズです。`{value}`"
            ))),
        }
    }
}

/// スケーリングとマスクをしていない整数のフィールド
///
/// 値はホストのバイト・オーダーに変換済みで、`i32`に拡張されている。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    width: usize,
    height: usize,
    values: Vec<i32>,
}

impl RawPayload {
    /// 経度方向の格子数
    pub fn width(&self) -> usize {
        self.width
    }

    /// 緯度方向の格子数
    pub fn height(&self) -> usize {
        self.height
    }

    /// 記録順（行優先）の値
    pub fn values(&self) -> &[i32] {
        &self.values
    }

    /// 指定した行と列の値を返す。範囲外の場合は`None`。
    pub fn get(&self, row: usize, col: usize) -> Option<i32> {
        if row < self.height && col < self.width {
            Some(self.values[row * self.width + col])
        } else {
            None
        }
    }

    /// 記録順（行優先）の値を取り出す。
    pub fn into_values(self) -> Vec<i32> {
        self.values
    }
}

/// バイト列の各要素のバイト順序を反転する。
///
/// 1バイトの要素は何もしない。バイト列の長さは要素サイズの倍数であること。
pub fn swap_byte_order(buf: &mut [u8], element_size: ElementSize) {
    if element_size == ElementSize::One {
        return;
    }
    for element in buf.chunks_exact_mut(element_size.bytes()) {
        element.reverse();
    }
}

/// 格子データを読み込む。
///
/// `reader`の読み込み位置がフィールドの先頭にあることを想定している。
///
/// # 引数
///
/// * `reader` - リーダー
/// * `width` - 経度方向の格子数
/// * `height` - 緯度方向の格子数
/// * `element_size` - 格子1つあたりのバイト数
/// * `byte_order` - ファイルに記録されているバイト・オーダー
///
/// # 戻り値
///
/// ホストのバイト・オーダーに変換した`RawPayload`
pub fn read_payload<R>(
    reader: &mut R,
    width: usize,
    height: usize,
    element_size: ElementSize,
    byte_order: ByteOrder,
) -> TrmmReaderResult<RawPayload>
where
    R: Read,
{
    let bytes = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(element_size.bytes()))
        .ok_or_else(|| {
            TrmmReaderError::Format(format!(
                "格子数が大きすぎます。`{width}x{height}`"
            ))
        })?;
    // バッファは実際に読み込めたバイト数だけ確保する
    let mut buf = Vec::new();
    reader
        .by_ref()
        .take(bytes as u64)
        .read_to_end(&mut buf)
        .map_err(|e| {
            TrmmReaderError::Unexpected(format!(
                "ファイルから格子データの{bytes}バイトの読み込みに失敗しました。{e}"
            ))
        })?;
    if buf.len() < bytes {
        return Err(TrmmReaderError::Truncated(format!(
            "格子データは{bytes}バイト必要ですが、{}バイトしか読み込めませんでした。",
            buf.len()
        )));
    }
    if byte_order != ByteOrder::native() {
        swap_byte_order(&mut buf, element_size);
    }

    Ok(RawPayload {
        width,
        height,
        values: decode_native(&buf, element_size),
    })
}

/// ホストのバイト・オーダーのバイト列を符号付き整数に変換する。
fn decode_native(buf: &[u8], element_size: ElementSize) -> Vec<i32> {
    match element_size {
        ElementSize::One => buf.iter().map(|&b| b as i8 as i32).collect(),
        ElementSize::Two => buf
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]) as i32)
            .collect(),
        ElementSize::Four => buf
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    }
}
