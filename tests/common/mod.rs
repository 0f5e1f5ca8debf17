//! 合成した3B4XRTファイルを作成するヘルパー

use std::path::{Path, PathBuf};

use trmm_rt::{ByteOrder, HEADER_BYTES};

pub const FLAG: i32 = -31999;

/// 合成ファイルに記録する変数
pub struct SyntheticVariable {
    pub scale: f32,
    pub element_size: usize,
    pub codes: Vec<i32>,
}

/// 合成ファイル
pub struct SyntheticFile {
    pub algorithm_id: &'static str,
    pub width: usize,
    pub height: usize,
    pub byte_order: ByteOrder,
    pub flag_value: i32,
    pub variables: Vec<SyntheticVariable>,
}

impl SyntheticFile {
    /// 2バイト整数の降水量だけを記録したファイル
    pub fn precipitation(
        width: usize,
        height: usize,
        scale: f32,
        byte_order: ByteOrder,
        codes: Vec<i32>,
    ) -> Self {
        Self {
            algorithm_id: "3B42RT",
            width,
            height,
            byte_order,
            flag_value: FLAG,
            variables: vec![SyntheticVariable {
                scale,
                element_size: 2,
                codes,
            }],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let header = format!(
            "algorithm_ID={} header_byte_length={HEADER_BYTES} \
             nominal_YYYYMMDD=20080101 nominal_HHMMSS=030000 origin=northwest \
             number_of_latitude_bins={} number_of_longitude_bins={} \
             number_of_variables={} variable_scale={} variable_type={} \
             byte_order={} flag_value={} flag_name=missing_value",
            self.algorithm_id,
            self.height,
            self.width,
            self.variables.len(),
            join(&self.variables, |v| v.scale.to_string()),
            join(&self.variables, |v| format!("signed_integer{}", v.element_size)),
            self.byte_order.tag(),
            self.flag_value,
        );
        let mut bytes = header.into_bytes();
        bytes.resize(HEADER_BYTES, 0);

        for variable in &self.variables {
            assert_eq!(variable.codes.len(), self.width * self.height);
            for &code in &variable.codes {
                let encoded = match variable.element_size {
                    1 => vec![code as i8 as u8],
                    2 => encode(&(code as i16).to_be_bytes(), self.byte_order),
                    4 => encode(&code.to_be_bytes(), self.byte_order),
                    n => panic!("unsupported element size {n}"),
                };
                bytes.extend_from_slice(&encoded);
            }
        }

        bytes
    }

    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.to_bytes()).unwrap();
        path
    }
}

fn join<F>(variables: &[SyntheticVariable], f: F) -> String
where
    F: Fn(&SyntheticVariable) -> String,
{
    variables.iter().map(f).collect::<Vec<_>>().join(",")
}

fn encode(big_endian: &[u8], byte_order: ByteOrder) -> Vec<u8> {
    let mut bytes = big_endian.to_vec();
    if byte_order == ByteOrder::LittleEndian {
        bytes.reverse();
    }
    bytes
}

/// 物理量をスケールで整数に量子化する。
pub fn quantize(value: f32, scale: f32) -> i32 {
    (value * scale).round() as i32
}
