//! Segment 文件与 segment 目录文件
//!
//! 磁盘布局（每个 layout 一组文件）：
//! ```text
//! <dir>/
//! ├── <layout>.idx                      ← 目录：resets,uptime,recordCount,segmentFileName
//! ├── <layout>_<resets>_<uptime>.log    ← 追加写文本行：id,resets,uptime,type,v0,…,vN
//! └── ...
//! ```
//!
//! 写入顺序固定为“先追加数据行，再重写目录文件”，崩溃时目录最多落后于数据，
//! 重新加载 segment 时按实际行数修正。

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use crate::common::{EpochKey, Result, TelemError};

pub const INDEX_EXT:   &str = "idx";
pub const SEGMENT_EXT: &str = "log";

// ── Segment ───────────────────────────────────────────────────────────────────

/// 一个有容量上限的追加写文件，起始键为第一条写入记录的 (resets, uptime)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub first_key: EpochKey,
    pub file_name: String,
    pub records:   usize,
    loaded:        bool,
}

impl Segment {
    /// 新建的 segment 没有需要读取的数据，直接视为已加载
    pub fn new(first_key: EpochKey, file_name: String) -> Self {
        Self { first_key, file_name, records: 0, loaded: true }
    }

    pub fn is_loaded(&self) -> bool { self.loaded }
    pub fn mark_loaded(&mut self) { self.loaded = true; }

    pub fn path(&self, dir: &Path) -> PathBuf { dir.join(&self.file_name) }

    /// `<table>_<resets>_<uptime>.log`，seq > 0 时追加序号避免同锚点重名
    pub fn file_name_for(table: &str, key: EpochKey, seq: usize) -> String {
        if seq == 0 {
            format!("{table}_{}_{}.{SEGMENT_EXT}", key.resets, key.uptime)
        } else {
            format!("{table}_{}_{}_{seq}.{SEGMENT_EXT}", key.resets, key.uptime)
        }
    }

    pub fn to_index_line(&self) -> String {
        format!("{},{},{},{}", self.first_key.resets, self.first_key.uptime, self.records, self.file_name)
    }

    pub fn from_index_line(line: &str) -> Result<Self> {
        let cols: Vec<&str> = line.split(',').map(str::trim).collect();
        let bad = || TelemError::DataLoad(format!("corrupt segment index line: {line:?}"));
        if cols.len() < 4 || cols[3].is_empty() {
            return Err(bad());
        }
        let resets  = cols[0].parse().map_err(|_| bad())?;
        let uptime  = cols[1].parse().map_err(|_| bad())?;
        let records = cols[2].parse().map_err(|_| bad())?;
        Ok(Self {
            first_key: EpochKey::new(resets, uptime),
            file_name: cols[3].into(),
            records,
            loaded: false,
        })
    }

    // ── 数据文件 I/O ──────────────────────────────────────────────────────────

    /// 追加一行；若上次写入中途崩溃导致末尾缺换行，先补一个
    pub fn append(&self, dir: &Path, line: &str) -> Result<()> {
        let path = self.path(dir);
        let repair = !ends_with_newline(&path)?;
        if repair {
            warn!(file = %path.display(), "segment file ends with a partial line, terminating it");
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut out = BufWriter::new(file);
        if repair {
            out.write_all(b"\n")?;
        }
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }

    /// 读取全部非空行；文件不存在时创建空文件
    pub fn read_lines(&self, dir: &Path) -> Result<Vec<String>> {
        let path = self.path(dir);
        let lines = read_text_lines(&path)?;
        debug!(file = %path.display(), lines = lines.len(), "read segment");
        Ok(lines)
    }

    /// 用 `lines` 整体替换数据文件
    pub fn rewrite(&self, dir: &Path, lines: &[String]) -> Result<()> {
        replace_file(&self.path(dir), lines)
    }
}

/// 按 `\n` 切行，空行忽略；不是合法 UTF-8 的行告警后跳过，不影响其余行
fn read_text_lines(path: &Path) -> Result<Vec<String>> {
    let file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
    let mut lines = Vec::new();
    for (n, raw) in BufReader::new(file).split(b'\n').enumerate() {
        match String::from_utf8(raw?) {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => lines.push(line),
            Err(_)   => warn!(file = %path.display(), line = n + 1, "skipping line that is not valid UTF-8"),
        }
    }
    Ok(lines)
}

/// 先写 `<path>.tmp` 再 rename，避免留下半截文件
fn replace_file(path: &Path, lines: &[String]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut out = BufWriter::new(File::create(&tmp)?);
        for line in lines {
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// 空文件或不存在的文件视为以换行结尾
fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n' || last[0] == b'\r')
}

// ── SegmentIndexFile ──────────────────────────────────────────────────────────

/// `<layout>.idx`：每行一个 segment
pub struct SegmentIndexFile {
    path: PathBuf,
}

impl SegmentIndexFile {
    pub fn new(dir: &Path, table: &str) -> Self {
        Self { path: dir.join(format!("{table}.{INDEX_EXT}")) }
    }

    pub fn path(&self) -> &Path { &self.path }

    /// 不存在时创建空文件并返回空列表；损坏行跳过
    pub fn load(&self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        for line in read_text_lines(&self.path)? {
            match Segment::from_index_line(&line) {
                Ok(seg) => segments.push(seg),
                Err(e)  => warn!(file = %self.path.display(), error = %e, "skipping segment index line"),
            }
        }
        Ok(segments)
    }

    pub fn save(&self, segments: &[Segment]) -> Result<()> {
        let lines: Vec<String> = segments.iter().map(Segment::to_index_line).collect();
        replace_file(&self.path, &lines)
    }

    pub fn remove(&self) -> Result<()> {
        remove_if_exists(&self.path)
    }
}

pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_line_round_trip() {
        let mut seg = Segment::new(EpochKey::new(3, 900), "rt_3_900.log".into());
        seg.records = 42;
        let parsed = Segment::from_index_line(&seg.to_index_line()).unwrap();
        assert_eq!(parsed.first_key, seg.first_key);
        assert_eq!(parsed.records, 42);
        assert_eq!(parsed.file_name, "rt_3_900.log");
        assert!(!parsed.is_loaded());
    }

    #[test]
    fn corrupt_index_line_is_rejected() {
        assert!(Segment::from_index_line("1,abc,3,f.log").is_err());
        assert!(Segment::from_index_line("1,2,3").is_err());
    }

    #[test]
    fn append_terminates_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let seg = Segment::new(EpochKey::new(0, 1), "t_0_1.log".into());
        std::fs::write(seg.path(dir.path()), "1,0,1,0,5\n1,0,2,0,").unwrap();

        seg.append(dir.path(), "1,0,3,0,7").unwrap();
        let text = std::fs::read_to_string(seg.path(dir.path())).unwrap();
        assert_eq!(text, "1,0,1,0,5\n1,0,2,0,\n1,0,3,0,7\n");
    }

    #[test]
    fn missing_segment_file_is_created_empty() {
        let dir = tempfile::tempdir().unwrap();
        let seg = Segment::new(EpochKey::new(0, 1), "t_0_1.log".into());
        assert!(seg.read_lines(dir.path()).unwrap().is_empty());
        assert!(seg.path(dir.path()).exists());
    }

    #[test]
    fn invalid_utf8_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let seg = Segment::new(EpochKey::new(0, 1), "t_0_1.log".into());
        let mut bytes = b"1,0,1,0,5\n".to_vec();
        bytes.extend_from_slice(b"1,0,2,0,\xff\xfe\n");
        bytes.extend_from_slice(b"1,0,3,0,7\r\n");
        std::fs::write(seg.path(dir.path()), bytes).unwrap();

        let lines = seg.read_lines(dir.path()).unwrap();
        assert_eq!(lines, vec!["1,0,1,0,5".to_string(), "1,0,3,0,7\r".to_string()]);
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let seg = Segment::new(EpochKey::new(0, 1), "t_0_1.log".into());
        seg.append(dir.path(), "1,0,1,0,5").unwrap();
        seg.append(dir.path(), "1,0,2,0,6").unwrap();
        seg.rewrite(dir.path(), &["1,0,1,0,5".to_string()]).unwrap();
        assert_eq!(std::fs::read_to_string(seg.path(dir.path())).unwrap(), "1,0,1,0,5\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn index_file_skips_undecodable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let idx = SegmentIndexFile::new(dir.path(), "rt");
        std::fs::write(idx.path(), b"0,100,2,rt_0_100.log\n\xff,1\n0,200,1,rt_0_200.log\n").unwrap();
        assert_eq!(idx.load().unwrap().len(), 2);
    }

    #[test]
    fn index_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let idx = SegmentIndexFile::new(dir.path(), "rt");
        assert!(idx.load().unwrap().is_empty());
        assert!(idx.path().exists());

        let mut a = Segment::new(EpochKey::new(0, 100), "rt_0_100.log".into());
        a.records = 2;
        let b = Segment::new(EpochKey::new(1, 5), "rt_1_5.log".into());
        idx.save(&[a, b]).unwrap();

        let loaded = idx.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].records, 2);
        assert_eq!(loaded[1].first_key, EpochKey::new(1, 5));
    }
}
