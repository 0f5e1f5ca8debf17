use std::collections::BTreeMap;
use std::io::Read;
use std::str::FromStr;

use time::{Date, Month, PrimitiveDateTime, Time};
use tracing::{debug, warn};

use crate::payload::{ByteOrder, ElementSize};
use crate::readers::{read_exact_or_truncated, TrmmReaderError, TrmmReaderResult};

/// 3B4XRTファイルのヘッダーのバイト数
pub const HEADER_BYTES: usize = 2880;

/// ヘッダーのレイアウト
///
/// ヘッダーの大きさと、各項目を記録しているキーを定義する。
/// `Default`は3B4XRTファイルのレイアウトである。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLayout {
    /// ヘッダーのバイト数
    pub header_bytes: usize,
    /// 経度方向の格子数
    pub width_key: String,
    /// 緯度方向の格子数
    pub height_key: String,
    /// 変数の数
    pub number_of_variables_key: String,
    /// 変数ごとのスケール（カンマ区切り）
    pub variable_scale_key: String,
    /// 変数ごとのデータ型（カンマ区切り）
    pub variable_type_key: String,
    /// 変数ごとの名前（カンマ区切り）
    pub variable_name_key: String,
    /// 変数ごとの単位（カンマ区切り）
    pub variable_units_key: String,
    /// バイト・オーダー
    pub byte_order_key: String,
    /// 欠測値
    pub flag_value_key: String,
    /// 公称日（YYYYMMDD）
    pub nominal_date_key: String,
    /// 公称時刻（HHMMSS）
    pub nominal_time_key: String,
    /// アルゴリズム識別子
    pub algorithm_id_key: String,
    /// ヘッダーに記録されたヘッダーのバイト数
    pub header_byte_length_key: String,
}

impl Default for HeaderLayout {
    fn default() -> Self {
        Self {
            header_bytes: HEADER_BYTES,
            width_key: "number_of_longitude_bins".into(),
            height_key: "number_of_latitude_bins".into(),
            number_of_variables_key: "number_of_variables".into(),
            variable_scale_key: "variable_scale".into(),
            variable_type_key: "variable_type".into(),
            variable_name_key: "variable_name".into(),
            variable_units_key: "variable_units".into(),
            byte_order_key: "byte_order".into(),
            flag_value_key: "flag_value".into(),
            nominal_date_key: "nominal_YYYYMMDD".into(),
            nominal_time_key: "nominal_HHMMSS".into(),
            algorithm_id_key: "algorithm_ID".into(),
            header_byte_length_key: "header_byte_length".into(),
        }
    }
}

/// 変数の属性
#[derive(Debug, Clone, PartialEq)]
pub struct VariableLayout {
    /// 変数名
    pub name: Option<String>,
    /// 単位
    pub units: Option<String>,
    /// スケール
    ///
    /// 記録されている整数をこの値で除算すると物理量になる。
    pub scale_factor: f32,
    /// 格子1つあたりのバイト数
    pub element_size: ElementSize,
}

/// ファイル・ヘッダー
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    /// ヘッダーに記録されていたすべての項目
    fields: BTreeMap<String, String>,
    /// ヘッダーのバイト数
    header_bytes: usize,
    /// 経度方向の格子数
    width: usize,
    /// 緯度方向の格子数
    height: usize,
    /// 記録順の変数
    variables: Vec<VariableLayout>,
    byte_order: ByteOrder,
    /// 欠測値
    flag_value: i32,
    /// 公称日時の文字列（`YYYYMMDD HHMMSS`）
    timestamp: String,
    nominal_date_time: PrimitiveDateTime,
    algorithm_id: Option<String>,
}

impl FileHeader {
    /// ヘッダーに記録されていたすべての項目を返す。
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// 指定したキーの値を返す。
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// ヘッダーのバイト数を返す。
    pub fn header_bytes(&self) -> usize {
        self.header_bytes
    }

    /// 経度方向の格子数を返す。
    pub fn width(&self) -> usize {
        self.width
    }

    /// 緯度方向の格子数を返す。
    pub fn height(&self) -> usize {
        self.height
    }

    /// 変数の数を返す。
    pub fn number_of_variables(&self) -> usize {
        self.variables.len()
    }

    /// 記録順の変数の属性を返す。
    pub fn variables(&self) -> &[VariableLayout] {
        &self.variables
    }

    /// 最初の変数（降水量）のスケールを返す。
    pub fn scale_factor(&self) -> f32 {
        self.variables[0].scale_factor
    }

    /// データ部のバイト・オーダーを返す。
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// 欠測値を返す。
    pub fn flag_value(&self) -> i32 {
        self.flag_value
    }

    /// 公称日時を`YYYYMMDD HHMMSS`形式の文字列で返す。
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// 公称日時を返す。
    pub fn nominal_date_time(&self) -> PrimitiveDateTime {
        self.nominal_date_time
    }

    /// アルゴリズム識別子（`3B42RT`など）を返す。
    pub fn algorithm_id(&self) -> Option<&str> {
        self.algorithm_id.as_deref()
    }

    /// 変数1つ分のデータ部のバイト数を返す。
    pub fn variable_bytes(&self, index: usize) -> Option<usize> {
        self.variables
            .get(index)
            .map(|v| self.width * self.height * v.element_size.bytes())
    }

    /// 変数が記録されているファイルの先頭からのバイト位置を返す。
    pub fn variable_offset(&self, index: usize) -> Option<u64> {
        if self.variables.len() <= index {
            return None;
        }
        let preceding: usize = (0..index).filter_map(|i| self.variable_bytes(i)).sum();

        Some((self.header_bytes + preceding) as u64)
    }

    /// ヘッダーとすべての変数を合わせたファイルのバイト数を返す。
    pub fn expected_file_bytes(&self) -> u64 {
        let payload: usize = (0..self.variables.len())
            .filter_map(|i| self.variable_bytes(i))
            .sum();

        (self.header_bytes + payload) as u64
    }

    /// ヘッダーの項目から`FileHeader`を構築する。
    ///
    /// # 引数
    ///
    /// * `fields` - ヘッダーに記録されていた項目
    /// * `layout` - ヘッダーのレイアウト
    pub fn from_fields(
        fields: BTreeMap<String, String>,
        layout: &HeaderLayout,
    ) -> TrmmReaderResult<Self> {
        let width: usize = required_number(&fields, &layout.width_key)?;
        let height: usize = required_number(&fields, &layout.height_key)?;
        if width == 0 || height == 0 {
            return Err(TrmmReaderError::Format(format!(
                "格子数が不正です。`{width}x{height}`"
            )));
        }
        let variables = read_variables(&fields, layout)?;
        width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(ElementSize::Four.bytes() * variables.len()))
            .and_then(|n| n.checked_add(layout.header_bytes))
            .ok_or_else(|| {
                TrmmReaderError::Format(format!("格子数が大きすぎます。`{width}x{height}`"))
            })?;
        let byte_order = ByteOrder::try_from(required(&fields, &layout.byte_order_key)?)?;
        let flag_value: i32 = required_number(&fields, &layout.flag_value_key)?;
        let (timestamp, nominal_date_time) = read_nominal_date_time(&fields, layout)?;
        let algorithm_id = fields.get(&layout.algorithm_id_key).cloned();

        if let Some(declared) = fields.get(&layout.header_byte_length_key) {
            match parse_lenient::<usize>(declared) {
                Some(declared) if declared == layout.header_bytes => {}
                _ => warn!(
                    "ヘッダーに記録されたヘッダーのバイト数`{declared}`が、{}バイトと一致しません。",
                    layout.header_bytes
                ),
            }
        }

        Ok(Self {
            fields,
            header_bytes: layout.header_bytes,
            width,
            height,
            variables,
            byte_order,
            flag_value,
            timestamp,
            nominal_date_time,
            algorithm_id,
        })
    }
}

/// ヘッダーを読み込む。
///
/// `reader`の読み込み位置がファイルの先頭にあることを想定している。
/// ヘッダーは空白またはNULで区切られた`key=value`の並びで、残りは空白またはNULで埋められている。
///
/// # 引数
///
/// * `reader` - リーダー
/// * `layout` - ヘッダーのレイアウト
///
/// # 戻り値
///
/// `FileHeader`
pub fn read_header<R>(reader: &mut R, layout: &HeaderLayout) -> TrmmReaderResult<FileHeader>
where
    R: Read,
{
    let mut buf = vec![0u8; layout.header_bytes];
    read_exact_or_truncated(reader, &mut buf, "ヘッダー")?;
    if !buf.is_ascii() {
        return Err(TrmmReaderError::Format(
            "ヘッダーにASCII以外のバイトが記録されています。".into(),
        ));
    }
    let text = String::from_utf8(buf).map_err(|e| {
        TrmmReaderError::Format(format!("ヘッダーを文字列に変換できません。{e}"))
    })?;
    let fields = parse_fields(&text);
    debug!("ヘッダーから{}項目を読み込みました。", fields.len());

    FileHeader::from_fields(fields, layout)
}

/// ヘッダーの文字列を`key=value`の項目に分割する。
///
/// `=`を含まない要素は読み飛ばす。同じキーが複数ある場合は後の値を採用する。
pub fn parse_fields(text: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for token in text
        .split(|c: char| c.is_ascii_whitespace() || c == '\0')
        .filter(|t| !t.is_empty())
    {
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                fields.insert(key.to_string(), value.trim().to_string());
            }
            _ => warn!("ヘッダーの`{token}`は`key=value`形式ではないため無視します。"),
        }
    }

    fields
}

/// 数値の前後にある数値以外の文字を取り除いてから変換する。
///
/// `100.`、`480,`、`60N`などを許容する。
/// 整数型では、小数部がすべて0の`480.`や`480.0`を許容し、`480.5`は`None`を返す。
pub fn parse_lenient<T>(value: &str) -> Option<T>
where
    T: FromStr,
{
    let trimmed = value
        .trim_start_matches(|c: char| !(c.is_ascii_digit() || c == '-' || c == '+' || c == '.'))
        .trim_end_matches(|c: char| !c.is_ascii_digit() && c != '.');
    if let Ok(v) = trimmed.parse() {
        return Some(v);
    }
    match trimmed.split_once('.') {
        Some((integral, fraction)) if fraction.bytes().all(|b| b == b'0') => {
            integral.parse().ok()
        }
        _ => None,
    }
}

fn required<'a>(fields: &'a BTreeMap<String, String>, key: &str) -> TrmmReaderResult<&'a str> {
    fields
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| TrmmReaderError::Format(format!("ヘッダーに`{key}`がありません。")))
}

fn required_number<T>(fields: &BTreeMap<String, String>, key: &str) -> TrmmReaderResult<T>
where
    T: FromStr,
{
    let value = required(fields, key)?;
    parse_lenient(value).ok_or_else(|| {
        TrmmReaderError::Format(format!("ヘッダーの`{key}`が数値ではありません。`{value}`"))
    })
}

/// カンマ区切りの値を分割する。
fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// `signed_integer2`などのデータ型から格子1つあたりのバイト数を求める。
fn parse_variable_type(value: &str) -> TrmmReaderResult<ElementSize> {
    let size = value
        .strip_prefix("signed_integer")
        .and_then(parse_lenient::<usize>)
        .ok_or_else(|| {
            TrmmReaderError::Format(format!("サポートしていないデータ型です。`{value}`"))
        })?;

    ElementSize::try_from(size)
}

fn read_variables(
    fields: &BTreeMap<String, String>,
    layout: &HeaderLayout,
) -> TrmmReaderResult<Vec<VariableLayout>> {
    let types = split_list(required(fields, &layout.variable_type_key)?);
    let scales = split_list(required(fields, &layout.variable_scale_key)?);
    let number_of_variables = match fields.get(&layout.number_of_variables_key) {
        Some(_) => required_number::<usize>(fields, &layout.number_of_variables_key)?,
        None => types.len(),
    };
    if number_of_variables == 0 {
        return Err(TrmmReaderError::Format(
            "ヘッダーに変数が記録されていません。".into(),
        ));
    }
    if types.len() != number_of_variables || scales.len() != number_of_variables {
        return Err(TrmmReaderError::Format(format!(
            "変数の数({number_of_variables})と、データ型の数({})またはスケールの数({})が一致しません。",
            types.len(),
            scales.len()
        )));
    }
    let names = fields
        .get(&layout.variable_name_key)
        .map(|v| split_list(v))
        .unwrap_or_default();
    let units = fields
        .get(&layout.variable_units_key)
        .map(|v| split_list(v))
        .unwrap_or_default();

    let mut variables = Vec::with_capacity(number_of_variables);
    for (i, (variable_type, scale)) in types.iter().zip(scales.iter()).enumerate() {
        let scale_factor: f32 = parse_lenient(scale).ok_or_else(|| {
            TrmmReaderError::Format(format!("変数{i}のスケールが数値ではありません。`{scale}`"))
        })?;
        if !scale_factor.is_finite() || scale_factor == 0.0 {
            return Err(TrmmReaderError::Format(format!(
                "変数{i}のスケールが不正です。`{scale}`"
            )));
        }
        variables.push(VariableLayout {
            name: names.get(i).map(|s| s.to_string()),
            units: units.get(i).map(|s| s.to_string()),
            scale_factor,
            element_size: parse_variable_type(variable_type)?,
        });
    }

    Ok(variables)
}

fn read_nominal_date_time(
    fields: &BTreeMap<String, String>,
    layout: &HeaderLayout,
) -> TrmmReaderResult<(String, PrimitiveDateTime)> {
    let date = required(fields, &layout.nominal_date_key)?;
    let time = required(fields, &layout.nominal_time_key)?;
    let ymd: u32 = required_number(fields, &layout.nominal_date_key)?;
    let hms: u32 = required_number(fields, &layout.nominal_time_key)?;

    let month = Month::try_from(date_component::<u8>(ymd / 100 % 100, date)?).map_err(|e| {
        TrmmReaderError::Format(format!("ヘッダーに記録されている月が不正です。`{date}` {e}"))
    })?;
    let date_part = Date::from_calendar_date(
        date_component(ymd / 10_000, date)?,
        month,
        date_component(ymd % 100, date)?,
    )
    .map_err(|e| {
        TrmmReaderError::Format(format!(
            "ヘッダーに記録されている年月日から、日付を構築できませんでした。`{date}` {e}"
        ))
    })?;
    let time_part = Time::from_hms(
        date_component(hms / 10_000, time)?,
        date_component(hms / 100 % 100, time)?,
        date_component(hms % 100, time)?,
    )
    .map_err(|e| {
        TrmmReaderError::Format(format!(
            "ヘッダーに記録されている時分秒から、時刻を構築できませんでした。`{time}` {e}"
        ))
    })?;

    Ok((
        format!("{date} {time}"),
        PrimitiveDateTime::new(date_part, time_part),
    ))
}

/// 日時の要素を範囲を確認して変換する。
fn date_component<T>(value: u32, raw: &str) -> TrmmReaderResult<T>
where
    T: TryFrom<u32>,
{
    T::try_from(value).map_err(|_| {
        TrmmReaderError::Format(format!(
            "ヘッダーに記録されている日時の要素({value})が範囲外です。`{raw}`"
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use time::macros::datetime;

    use super::*;

    const FIELDS: &str = "algorithm_ID=3B42RT algorithm_version=01.01 \
        header_byte_length=2880 nominal_YYYYMMDD=20080101 nominal_HHMMSS=030000 \
        origin=northwest number_of_latitude_bins=480 number_of_longitude_bins=1440 \
        number_of_variables=4 \
        variable_name=precipitation,precipitation_error,source_of_estimate,uncalibrated_precipitation \
        variable_units=mm/h,mm/h,source_code,mm/h variable_scale=100,100,1,100 \
        variable_type=signed_integer2,signed_integer2,signed_integer1,signed_integer2 \
        byte_order=big_endian flag_value=-31999 flag_name=missing_value";

    fn header_bytes(text: &str, pad: u8) -> Vec<u8> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(HEADER_BYTES, pad);
        bytes
    }

    #[test]
    fn reads_3b42rt_header() {
        let header = read_header(
            &mut Cursor::new(header_bytes(FIELDS, b' ')),
            &HeaderLayout::default(),
        )
        .unwrap();
        assert_eq!(header.width(), 1440);
        assert_eq!(header.height(), 480);
        assert_eq!(header.number_of_variables(), 4);
        assert_eq!(header.scale_factor(), 100.0);
        assert_eq!(header.byte_order(), ByteOrder::BigEndian);
        assert_eq!(header.flag_value(), -31999);
        assert_eq!(header.timestamp(), "20080101 030000");
        assert_eq!(header.nominal_date_time(), datetime!(2008-01-01 03:00));
        assert_eq!(header.algorithm_id(), Some("3B42RT"));
        assert_eq!(header.get("origin"), Some("northwest"));
        assert_eq!(header.fields().len(), 16);

        let variables = header.variables();
        assert_eq!(variables[2].element_size, ElementSize::One);
        assert_eq!(variables[2].scale_factor, 1.0);
        assert_eq!(variables[3].name.as_deref(), Some("uncalibrated_precipitation"));
        assert_eq!(variables[0].units.as_deref(), Some("mm/h"));

        let grid = 1440 * 480;
        assert_eq!(header.variable_offset(0), Some(2880));
        assert_eq!(header.variable_offset(2), Some(2880 + 4 * grid as u64));
        assert_eq!(header.variable_offset(3), Some(2880 + 5 * grid as u64));
        assert_eq!(header.variable_offset(4), None);
        assert_eq!(header.expected_file_bytes(), 2880 + 7 * grid as u64);
    }

    #[test]
    fn tolerates_nul_padding_and_stray_tokens() {
        let text = format!("  junk {FIELDS}\n stray\t");
        let header = read_header(
            &mut Cursor::new(header_bytes(&text, 0)),
            &HeaderLayout::default(),
        )
        .unwrap();
        assert_eq!(header.width(), 1440);
        assert!(header.get("junk").is_none());
    }

    #[test]
    fn parses_numbers_leniently() {
        assert_eq!(parse_lenient::<f32>("100."), Some(100.0));
        assert_eq!(parse_lenient::<usize>("100."), Some(100));
        assert_eq!(parse_lenient::<usize>("480,"), Some(480));
        assert_eq!(parse_lenient::<i32>("-31999"), Some(-31999));
        assert_eq!(parse_lenient::<i32>("(-31999)"), Some(-31999));
        assert_eq!(parse_lenient::<f32>("60N"), Some(60.0));
        assert_eq!(parse_lenient::<u32>("n/a"), None);
        assert_eq!(parse_lenient::<usize>("480.0"), Some(480));
        assert_eq!(parse_lenient::<i32>("-31999.00"), Some(-31999));
        assert_eq!(parse_lenient::<usize>("480.5"), None);
        assert_eq!(parse_lenient::<f32>("480.5"), Some(480.5));
    }

    #[test]
    fn missing_fields_are_format_errors() {
        for key in [
            "number_of_longitude_bins",
            "number_of_latitude_bins",
            "variable_scale",
            "byte_order",
            "flag_value",
            "nominal_YYYYMMDD",
        ] {
            let text: Vec<&str> = FIELDS
                .split_whitespace()
                .filter(|t| !t.starts_with(&format!("{key}=")))
                .collect();
            let err = read_header(
                &mut Cursor::new(header_bytes(&text.join(" "), b' ')),
                &HeaderLayout::default(),
            )
            .unwrap_err();
            assert!(matches!(err, TrmmReaderError::Format(_)), "{key}: {err:?}");
        }
    }

    #[test]
    fn rejects_malformed_values() {
        for (from, to) in [
            ("number_of_latitude_bins=480", "number_of_latitude_bins=many"),
            ("byte_order=big_endian", "byte_order=pdp_endian"),
            ("signed_integer1", "signed_integer3"),
            ("signed_integer1", "unsigned_integer1"),
            ("variable_scale=100,100,1,100", "variable_scale=100,100,0,100"),
            ("variable_scale=100,100,1,100", "variable_scale=100,100,1"),
            ("nominal_YYYYMMDD=20080101", "nominal_YYYYMMDD=20081301"),
            ("nominal_HHMMSS=030000", "nominal_HHMMSS=250000"),
            ("nominal_HHMMSS=030000", "nominal_HHMMSS=2560000"),
            ("nominal_YYYYMMDD=20080101", "nominal_YYYYMMDD=20082601"),
            ("number_of_latitude_bins=480", "number_of_latitude_bins=480.5"),
        ] {
            let text = FIELDS.replace(from, to);
            let err = read_header(
                &mut Cursor::new(header_bytes(&text, b' ')),
                &HeaderLayout::default(),
            )
            .unwrap_err();
            assert!(matches!(err, TrmmReaderError::Format(_)), "{to}: {err:?}");
        }
    }

    #[test]
    fn accepts_integral_float_text() {
        let text = FIELDS
            .replace("number_of_latitude_bins=480", "number_of_latitude_bins=480.0")
            .replace("flag_value=-31999", "flag_value=-31999.");
        let header = read_header(
            &mut Cursor::new(header_bytes(&text, b' ')),
            &HeaderLayout::default(),
        )
        .unwrap();
        assert_eq!(header.height(), 480);
        assert_eq!(header.flag_value(), -31999);
    }

    #[test]
    fn rejects_non_ascii_and_short_headers() {
        let mut bytes = header_bytes(FIELDS, b' ');
        bytes[HEADER_BYTES - 1] = 0xe3;
        let err = read_header(&mut Cursor::new(bytes), &HeaderLayout::default()).unwrap_err();
        assert!(matches!(err, TrmmReaderError::Format(_)), "{err:?}");

        let mut bytes = header_bytes(FIELDS, b' ');
        bytes.truncate(HEADER_BYTES - 1);
        let err = read_header(&mut Cursor::new(bytes), &HeaderLayout::default()).unwrap_err();
        assert!(matches!(err, TrmmReaderError::Truncated(_)), "{err:?}");
    }

    #[test]
    fn custom_layout_changes_window_and_keys() {
        let layout = HeaderLayout {
            header_bytes: 512,
            width_key: "nlon".into(),
            height_key: "nlat".into(),
            ..HeaderLayout::default()
        };
        let text = FIELDS
            .replace("number_of_longitude_bins", "nlon")
            .replace("number_of_latitude_bins", "nlat");
        let mut bytes = text.into_bytes();
        bytes.resize(512, b' ');
        let header = read_header(&mut Cursor::new(bytes), &layout).unwrap();
        assert_eq!(header.header_bytes(), 512);
        assert_eq!(header.width(), 1440);
        assert_eq!(header.variable_offset(0), Some(512));
    }
}
