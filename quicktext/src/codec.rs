//! Binary model file layout.
//!
//! A model file holds, in order: the [`Args`] (bincode), the dictionary
//! (see [`Dictionary::save`]), and the raw payloads of the input and output
//! matrices. Matrix shapes are not stored; they follow from the dictionary
//! and the arguments. Integers and floats are written in native byte order.

use std::io::{self, BufRead, ErrorKind, Read, Write};

use anyhow::{Context, Result};

use crate::args::{Args, ModelName};
use crate::dictionary::Dictionary;
use crate::matrix::Matrix;
use crate::real;

pub fn write_i32<W: Write + ?Sized>(out: &mut W, value: i32) -> io::Result<()> {
    out.write_all(bytemuck::bytes_of(&value))
}

pub fn write_i64<W: Write + ?Sized>(out: &mut W, value: i64) -> io::Result<()> {
    out.write_all(bytemuck::bytes_of(&value))
}

pub fn read_i32<R: Read + ?Sized>(input: &mut R) -> io::Result<i32> {
    let mut value = 0i32;
    input.read_exact(bytemuck::bytes_of_mut(&mut value))?;
    Ok(value)
}

pub fn read_i64<R: Read + ?Sized>(input: &mut R) -> io::Result<i64> {
    let mut value = 0i64;
    input.read_exact(bytemuck::bytes_of_mut(&mut value))?;
    Ok(value)
}

/// Write `s` followed by a NUL byte.
pub fn write_cstr<W: Write + ?Sized>(out: &mut W, s: &str) -> io::Result<()> {
    out.write_all(s.as_bytes())?;
    out.write_all(&[0])
}

pub fn read_cstr<R: BufRead + ?Sized>(input: &mut R) -> io::Result<String> {
    let mut bytes = Vec::new();
    input.read_until(0, &mut bytes)?;
    if bytes.pop() != Some(0) {
        return Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            "unterminated string",
        ));
    }
    String::from_utf8(bytes).map_err(|err| io::Error::new(ErrorKind::InvalidData, err))
}

pub fn save_matrix<W: Write + ?Sized>(out: &mut W, m: &Matrix) -> io::Result<()> {
    let mut row: Vec<real> = Vec::with_capacity(m.cols());
    for i in 0..m.rows() {
        row.clear();
        row.extend(m.row(i).iter().map(|cell| cell.get()));
        out.write_all(bytemuck::cast_slice::<real, u8>(&row))?;
    }
    Ok(())
}

/// Fill `m` from a payload written by [`save_matrix`] for a matrix of the same shape.
pub fn load_matrix<R: Read + ?Sized>(input: &mut R, m: &mut Matrix) -> io::Result<()> {
    let mut row: Vec<real> = vec![0.0; m.cols()];
    for i in 0..m.rows() {
        input.read_exact(bytemuck::cast_slice_mut::<real, u8>(&mut row))?;
        for (cell, &x) in m.row(i).iter().zip(&row) {
            cell.set(x);
        }
    }
    Ok(())
}

/// Number of output rows for a model trained with `args` on `dict`.
pub fn output_rows(args: &Args, dict: &Dictionary) -> usize {
    if args.model == ModelName::Supervised {
        dict.nlabels()
    } else {
        dict.nwords()
    }
}

pub fn save_model<W: Write>(
    out: &mut W,
    args: &Args,
    dict: &Dictionary,
    input: &Matrix,
    output: &Matrix,
) -> Result<()> {
    bincode::serialize_into(&mut *out, args).context("error writing model arguments")?;
    dict.save(out).context("error writing dictionary")?;
    save_matrix(out, input).context("error writing input matrix")?;
    save_matrix(out, output).context("error writing output matrix")?;
    out.flush().context("error writing model file")?;
    Ok(())
}

pub fn load_model<R: BufRead>(input: &mut R) -> Result<(Args, Dictionary, Matrix, Matrix)> {
    let args: Args =
        bincode::deserialize_from(&mut *input).context("error reading model arguments")?;
    let dict = Dictionary::load(args.clone(), input).context("error reading dictionary")?;

    let mut wi = Matrix::new(dict.nwords() + args.bucket, args.dim)?;
    load_matrix(input, &mut wi).context("error reading input matrix")?;
    let mut wo = Matrix::new(output_rows(&args, &dict), args.dim)?;
    load_matrix(input, &mut wo).context("error reading output matrix")?;
    Ok((args, dict, wi, wo))
}
