use num_traits::{Float, NumCast};

use crate::types::DType;

/// Typed host storage behind a `Tensor`.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    /// Buffer holding f32 data.
    F32(Vec<f32>),
    /// Buffer holding f64 data.
    F64(Vec<f64>),
}

impl Buffer {
    /// Builds a buffer of the requested dtype from f64 values.
    pub fn from_f64_values(values: Vec<f64>, dtype: DType) -> Self {
        match dtype {
            DType::F32 => Buffer::F32(cast_values(&values)),
            DType::F64 => Buffer::F64(values),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Buffer::F32(_) => DType::F32,
            Buffer::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::F32(v) => v.len(),
            Buffer::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the values out as f64, whatever the storage type.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Buffer::F32(v) => cast_values(v),
            Buffer::F64(v) => v.clone(),
        }
    }

    /// Applies `f` element-wise, computing in f64 and storing back in the buffer's dtype.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Buffer {
        match self {
            Buffer::F32(v) => Buffer::F32(map_values(v, &f)),
            Buffer::F64(v) => Buffer::F64(map_values(v, &f)),
        }
    }

    /// Combines two buffers of the same dtype and length element-wise.
    /// Callers check dtype and length first; a mismatch yields `None`.
    pub fn zip_map(&self, other: &Buffer, f: impl Fn(f64, f64) -> f64) -> Option<Buffer> {
        match (self, other) {
            (Buffer::F32(a), Buffer::F32(b)) if a.len() == b.len() => {
                Some(Buffer::F32(zip_values(a, b, &f)))
            }
            (Buffer::F64(a), Buffer::F64(b)) if a.len() == b.len() => {
                Some(Buffer::F64(zip_values(a, b, &f)))
            }
            _ => None,
        }
    }

    /// Folds every element (as f64) into an accumulator.
    pub fn fold(&self, init: f64, f: impl Fn(f64, f64) -> f64) -> f64 {
        match self {
            Buffer::F32(v) => v.iter().fold(init, |acc, &x| f(acc, x as f64)),
            Buffer::F64(v) => v.iter().fold(init, |acc, &x| f(acc, x)),
        }
    }
}

fn to_f64<T: Float>(value: T) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

fn from_f64<T: Float>(value: f64) -> T {
    <T as NumCast>::from(value).unwrap_or_else(T::nan)
}

fn cast_values<S: Float, D: Float>(values: &[S]) -> Vec<D> {
    values.iter().map(|&v| from_f64(to_f64(v))).collect()
}

fn map_values<T: Float>(values: &[T], f: &impl Fn(f64) -> f64) -> Vec<T> {
    values.iter().map(|&v| from_f64(f(to_f64(v)))).collect()
}

fn zip_values<T: Float>(a: &[T], b: &[T], f: &impl Fn(f64, f64) -> f64) -> Vec<T> {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| from_f64(f(to_f64(x), to_f64(y))))
        .collect()
}
