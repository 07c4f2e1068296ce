//! Provider-level coverage: file-backed sources and sinks, bulk transfers, stream adapters, and
//! misbehaving providers.

use std::{
	fs::{self, File},
	io::{Cursor, ErrorKind},
	path::PathBuf,
};
use wirepack::{
	error::{Error, Result},
	sink::{DiscardSink, FileSink, StreamSink},
	source::{FileSource, SourceProvider, StreamSource},
	MessageReader, MessageWriter, ReaderOptions, WriterOptions,
};

fn temp_path(name: &str) -> PathBuf {
	std::env::temp_dir().join(format!("wirepack-{}-{name}", std::process::id()))
}

struct TempFile(PathBuf);

impl TempFile {
	fn new(name: &str) -> Self {
		Self(temp_path(name))
	}
}

impl Drop for TempFile {
	fn drop(&mut self) {
		let _ = fs::remove_file(&self.0);
	}
}

#[test]
fn file_round_trip() {
	let path = TempFile::new("roundtrip");
	{
		let file = File::create(&path.0).unwrap();
		let mut writer = MessageWriter::new(FileSink::new(file), WriterOptions::default()).unwrap();
		writer.write_array_header(3).unwrap();
		writer.write_i64(-1234567).unwrap();
		writer.write_string("stored").unwrap();
		writer.write_bool(true).unwrap();
		writer.close().unwrap();
	}
	let file = File::open(&path.0).unwrap();
	let mut reader = MessageReader::new(FileSource::new(file), ReaderOptions::default()).unwrap();
	assert_eq!(reader.read_array_header().unwrap(), 3);
	assert_eq!(reader.read_i64().unwrap(), -1234567);
	assert_eq!(reader.read_string().unwrap(), "stored");
	assert!(reader.read_bool().unwrap());
	reader.close().unwrap();
}

#[test]
fn skip_uses_seek_on_files() {
	let path = TempFile::new("seek");
	{
		let file = File::create(&path.0).unwrap();
		let mut writer = MessageWriter::new(FileSink::new(file), WriterOptions::default()).unwrap();
		writer.write_binary(&vec![0x55; 100_000]).unwrap();
		writer.write_u32(0xdead_beef).unwrap();
		writer.close().unwrap();
	}
	let file = File::open(&path.0).unwrap();
	let mut reader = MessageReader::new(FileSource::new(file), ReaderOptions::default()).unwrap();
	reader.skip_value().unwrap();
	assert_eq!(reader.read_u32().unwrap(), 0xdead_beef);
}

#[test]
fn bulk_transfer_between_files() {
	let src_path = TempFile::new("transfer-src");
	let dst_path = TempFile::new("transfer-dst");
	let payload: Vec<u8> = (0..100_000u32).map(|n| n as u8).collect();
	{
		let file = File::create(&src_path.0).unwrap();
		let mut writer = MessageWriter::new(FileSink::new(file), WriterOptions::default()).unwrap();
		writer.write_binary(&payload).unwrap();
		writer.close().unwrap();
	}

	// Stream the payload out of one file into the other without loading it whole.
	let src = File::open(&src_path.0).unwrap();
	let mut reader = MessageReader::new(FileSource::new(src), ReaderOptions::default()).unwrap();
	let dst = File::create(&dst_path.0).unwrap();
	let mut writer = MessageWriter::new(FileSink::new(dst), WriterOptions::default()).unwrap();

	let length = reader.read_binary_header().unwrap();
	writer.write_binary_header(length).unwrap();
	let moved = writer.sink_mut().transfer_from(reader.source_mut(), length as u64).unwrap();
	assert_eq!(moved, length as u64);
	writer.close().unwrap();

	let copy = File::open(&dst_path.0).unwrap();
	let mut check = MessageReader::new(FileSource::new(copy), ReaderOptions::default()).unwrap();
	assert_eq!(check.read_binary().unwrap(), payload);
}

#[test]
fn transfer_stops_at_end_of_input() {
	let mut data = Vec::new();
	{
		let mut writer = MessageWriter::to_vec(&mut data).unwrap();
		writer.write_payload(&[1, 2, 3]).unwrap();
		writer.close().unwrap();
	}
	let mut reader = MessageReader::from_slice(&data).unwrap();
	let mut out = Vec::new();
	let mut writer = MessageWriter::to_vec(&mut out).unwrap();
	let moved = writer.sink_mut().transfer_from(reader.source_mut(), 10).unwrap();
	writer.close().unwrap();
	assert_eq!(moved, 3);
	assert_eq!(out, [1, 2, 3]);
}

#[test]
fn stream_adapters_round_trip() {
	let mut out = Vec::new();
	{
		let mut writer = MessageWriter::new(StreamSink::new(&mut out), WriterOptions::default()).unwrap();
		writer.write_string("over a Write impl").unwrap();
		writer.write_u16(4096).unwrap();
		writer.close().unwrap();
	}
	let cursor = Cursor::new(out);
	let mut reader = MessageReader::new(StreamSource::new(cursor), ReaderOptions::default()).unwrap();
	assert_eq!(reader.read_string().unwrap(), "over a Write impl");
	assert_eq!(reader.read_u16().unwrap(), 4096);
}

#[test]
fn discard_sink_swallows_everything() {
	let mut writer = MessageWriter::new(DiscardSink::new(), WriterOptions::default()).unwrap();
	for n in 0..1000 {
		writer.write_i64(n).unwrap();
	}
	writer.write_string(&"x".repeat(100_000)).unwrap();
	writer.close().unwrap();
}

/// A provider that pretends to be a non-blocking socket with nothing buffered.
struct WouldBlockSource;

impl SourceProvider for WouldBlockSource {
	fn read(&mut self, _buf: &mut [u8], _min_hint: usize) -> Result<usize> {
		Err(std::io::Error::from(ErrorKind::WouldBlock).into())
	}
}

#[test]
fn zero_progress_providers_fail_loudly() {
	let mut reader = MessageReader::new(WouldBlockSource, ReaderOptions::default()).unwrap();
	assert!(matches!(reader.read_i32(), Err(Error::NonBlockingChannel)));
}
