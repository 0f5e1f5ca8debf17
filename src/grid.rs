use crate::payload::RawPayload;

/// 欠測格子に格納する値
pub const MISSING_VALUE: f32 = f32::NAN;

/// 物理量に変換した格子データ
///
/// 最初の行は最北端の緯度帯で、各行は西から東に格子が並ぶ。
/// 行と列の位置`(row, col)`の値は`values()[row * width + col]`に格納されている。
/// 欠測格子は`MISSING_VALUE`を格納し、`mask()`の同じ位置が`true`になる。
#[derive(Debug, Clone)]
pub struct PrecipitationGrid {
    width: usize,
    height: usize,
    values: Vec<f32>,
    mask: Vec<bool>,
}

impl PrecipitationGrid {
    /// 経度方向の格子数
    pub fn width(&self) -> usize {
        self.width
    }

    /// 緯度方向の格子数
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(height, width)`を返す。
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// 行優先で格納した値
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// 欠測格子を`true`とするマスク
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// 指定した行と列の値を返す。
    ///
    /// 欠測格子または範囲外の場合は`None`を返す。
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        let index = self.index(row, col)?;
        if self.mask[index] {
            None
        } else {
            Some(self.values[index])
        }
    }

    /// 指定した格子が欠測かを返す。範囲外の場合は`false`。
    pub fn is_missing(&self, row: usize, col: usize) -> bool {
        self.index(row, col).map(|i| self.mask[i]).unwrap_or(false)
    }

    /// 行ごとの値を北から順に返すイテレーター
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.values.chunks_exact(self.width.max(1))
    }

    /// 欠測格子の数
    pub fn missing_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// 欠測でない値を記録順に返すイテレーター
    pub fn valid_values(&self) -> impl Iterator<Item = f32> + '_ {
        self.values
            .iter()
            .zip(self.mask.iter())
            .filter(|&(_, &m)| !m)
            .map(|(&v, _)| v)
    }

    /// 欠測でない値の統計量を返す。すべて欠測の場合は`None`。
    pub fn statistics(&self) -> Option<GridStatistics> {
        let mut count = 0usize;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0f64;
        for v in self.valid_values() {
            let v = v as f64;
            count += 1;
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        if count == 0 {
            return None;
        }
        let mean = sum / count as f64;
        let variance = self
            .valid_values()
            .map(|v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / count as f64;

        Some(GridStatistics {
            count,
            min,
            max,
            mean,
            std_dev: variance.sqrt(),
        })
    }

    fn index(&self, row: usize, col: usize) -> Option<usize> {
        if row < self.height && col < self.width {
            Some(row * self.width + col)
        } else {
            None
        }
    }
}

/// 欠測格子の値は比較しない。
impl PartialEq for PrecipitationGrid {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.mask == other.mask
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .zip(self.mask.iter())
                .all(|((a, b), &m)| m || a == b)
    }
}

/// 欠測でない格子の統計量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridStatistics {
    /// 欠測でない格子の数
    pub count: usize,
    /// 最小値
    pub min: f64,
    /// 最大値
    pub max: f64,
    /// 平均値
    pub mean: f64,
    /// 母標準偏差
    pub std_dev: f64,
}

/// 整数のフィールドをスケーリングして、欠測値をマスクした格子データに変換する。
///
/// 欠測値の判定はスケーリング前の整数で行い、欠測値はスケーリングしない。
///
/// # 引数
///
/// * `payload` - 整数のフィールド
/// * `scale_factor` - 物理量に変換するときの除数
/// * `flag_value` - 欠測値
///
/// # パニック
///
/// `payload`の値の数が格子数と一致しない場合。読み込み処理の不具合を示す。
pub fn materialize(payload: &RawPayload, scale_factor: f32, flag_value: i32) -> PrecipitationGrid {
    let width = payload.width();
    let height = payload.height();
    let raw = payload.values();
    assert_eq!(
        raw.len(),
        width * height,
        "格子データの数が格子数と一致しません。"
    );

    let mut values = Vec::with_capacity(raw.len());
    let mut mask = Vec::with_capacity(raw.len());
    for row in 0..height {
        for col in 0..width {
            let code = raw[row * width + col];
            if code == flag_value {
                values.push(MISSING_VALUE);
                mask.push(true);
            } else {
                values.push(code as f32 / scale_factor);
                mask.push(false);
            }
        }
    }

    PrecipitationGrid {
        width,
        height,
        values,
        mask,
    }
}
