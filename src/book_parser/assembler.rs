//! 成书：把下载任务按目录顺序写成 TXT 或 EPUB。
//!
//! 先写同目录下的临时文件，完成后再 rename 到目标路径，中途失败不会留下看似完整的文件。

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use super::epub_generator::EpubGenerator;
use super::image_utils::CoverImage;
use super::parser::ContentParser;
use super::txt_writer;
use crate::base_system::context::OutputFormat;
use crate::download::models::DownloadJob;

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("写入输出文件失败 {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("文件已存在且配置禁止覆盖: {0}")]
    Exists(PathBuf),
    #[error("EPUB 生成失败: {0}")]
    Epub(String),
}

#[derive(Debug, Clone, Copy)]
pub struct AssembleOptions {
    pub first_line_indent_em: f32,
    pub allow_overwrite: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            first_line_indent_em: 2.0,
            allow_overwrite: true,
        }
    }
}

pub fn assemble(
    job: &DownloadJob,
    format: OutputFormat,
    output_path: &Path,
    cover: Option<&CoverImage>,
    options: AssembleOptions,
) -> Result<PathBuf, AssembleError> {
    if !options.allow_overwrite && output_path.exists() {
        return Err(AssembleError::Exists(output_path.to_path_buf()));
    }

    let bytes = match format {
        OutputFormat::Txt => {
            txt_writer::render_txt(&job.book, &job.ordered_contents()).into_bytes()
        }
        OutputFormat::Epub => render_epub(job, cover, options.first_line_indent_em)
            .map_err(|e| AssembleError::Epub(e.to_string()))?,
    };

    write_atomic(output_path, &bytes)?;
    info!(
        target: "assembler",
        path = %output_path.display(),
        format = format.extension(),
        chapters = job.chapters().len(),
        "输出文件已生成"
    );
    Ok(output_path.to_path_buf())
}

fn render_epub(job: &DownloadJob, cover: Option<&CoverImage>, indent_em: f32) -> anyhow::Result<Vec<u8>> {
    let mut epub = EpubGenerator::new(&job.book, indent_em)?;
    if let Some(cover) = cover {
        epub.set_cover(cover)?;
    }
    epub.add_info_page(&job.book);

    let rows = job.ordered_contents();
    let has_volumes = rows.iter().any(|(c, _)| !c.volume_name.trim().is_empty());
    let mut current_volume: Option<&str> = None;
    for (chapter, content) in &rows {
        let volume = chapter.volume_name.trim();
        if !volume.is_empty() && current_volume != Some(volume) {
            epub.add_volume(volume);
            current_volume = Some(volume);
        }
        let title = ContentParser::display_title(
            &chapter.title,
            content.and_then(|c| c.title.as_deref()),
        );
        let level = if has_volumes && current_volume.is_some() { 2 } else { 1 };
        epub.add_chapter(&title, content.map(|c| c.text.as_str()), level);
    }
    epub.generate()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AssembleError> {
    let io_err = |source: io::Error| AssembleError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".assemble-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book_parser::image_utils::{noisy_png, prepare_cover};
    use crate::book_parser::txt_writer::UNAVAILABLE_PLACEHOLDER;
    use crate::download::models::{Book, ChapterContent, sample_chapters};
    use std::io::Read as _;

    fn job_with_gap() -> DownloadJob {
        let book = Book {
            id: "42".into(),
            title: "测试书".into(),
            author: "作者甲".into(),
            description: "第一行简介".into(),
            original_title: None,
            cover_url: None,
        };
        let mut job = DownloadJob::new(book, sample_chapters(3));
        // 完成顺序与目录顺序相反
        for id in ["c3", "c1"] {
            job.mark_done(ChapterContent {
                item_id: id.into(),
                text: format!("\u{3000}\u{3000}正文{id}"),
                title: None,
            });
        }
        job.mark_failed("c2");
        job
    }

    fn read_entries(bytes: &[u8]) -> Vec<(String, String)> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let name = entry.name().to_string();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (name, String::from_utf8_lossy(&data).into_owned())
            })
            .collect()
    }

    #[test]
    fn txt_output_is_ordered_with_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/测试书.txt");
        assemble(&job_with_gap(), OutputFormat::Txt, &path, None, AssembleOptions::default()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let p1 = text.find("正文c1").unwrap();
        let p2 = text.find(UNAVAILABLE_PLACEHOLDER).unwrap();
        let p3 = text.find("正文c3").unwrap();
        assert!(p1 < p2 && p2 < p3);
        // 不留临时文件
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn refuses_to_overwrite_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("书.txt");
        fs::write(&path, "old").unwrap();
        let options = AssembleOptions {
            allow_overwrite: false,
            ..AssembleOptions::default()
        };
        let err = assemble(&job_with_gap(), OutputFormat::Txt, &path, None, options).unwrap_err();
        assert!(matches!(err, AssembleError::Exists(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
    }

    fn part_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.to_string_lossy().ends_with(".part"))
            .collect()
    }

    #[test]
    fn failed_write_leaves_no_output_or_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // 目标路径被目录占着，rename 必然失败
        let path = dir.path().join("测试书.txt");
        fs::create_dir(&path).unwrap();

        let err = assemble(&job_with_gap(), OutputFormat::Txt, &path, None, AssembleOptions::default())
            .unwrap_err();
        assert!(matches!(err, AssembleError::Io { .. }));
        assert!(path.is_dir());
        assert!(part_files(dir.path()).is_empty());
    }

    #[test]
    fn unwritable_parent_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let path = blocker.join("测试书.epub");

        let err = assemble(&job_with_gap(), OutputFormat::Epub, &path, None, AssembleOptions::default())
            .unwrap_err();
        assert!(matches!(err, AssembleError::Io { .. }));
        assert!(!path.exists());
        assert!(part_files(dir.path()).is_empty());
    }

    #[test]
    fn epub_has_chapters_in_order_cover_and_stable_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("测试书.epub");
        let cover = prepare_cover(&noisy_png(60, 80)).unwrap();
        assemble(
            &job_with_gap(),
            OutputFormat::Epub,
            &path,
            Some(&cover),
            AssembleOptions::default(),
        )
        .unwrap();

        let entries = read_entries(&fs::read(&path).unwrap());
        let find = |suffix: &str| {
            entries
                .iter()
                .find(|(name, _)| name.ends_with(suffix))
                .map(|(_, body)| body.clone())
                .unwrap_or_else(|| panic!("missing {suffix}"))
        };

        assert!(entries.iter().any(|(name, _)| name == "mimetype"));
        assert!(entries.iter().any(|(name, _)| name.contains("images/cover.png")));

        let opf = find("content.opf");
        assert!(opf.contains("测试书"));
        assert!(opf.contains(&crate::book_parser::epub_generator::book_uuid("42").to_string()));
        let i1 = opf.find("chapter_00001.xhtml").unwrap();
        let i2 = opf.find("chapter_00002.xhtml").unwrap();
        let i3 = opf.find("chapter_00003.xhtml").unwrap();
        assert!(i1 < i2 && i2 < i3);

        assert!(find("chapter_00001.xhtml").contains("正文c1"));
        assert!(find("chapter_00002.xhtml").contains(UNAVAILABLE_PLACEHOLDER));
        assert!(find("chapter_00003.xhtml").contains("正文c3"));
        assert!(find("volume_001.xhtml").contains("第一卷"));
        assert!(find("info.xhtml").contains("第一行简介"));
    }

    #[test]
    fn epub_without_cover_still_builds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("无封面.epub");
        assemble(&job_with_gap(), OutputFormat::Epub, &path, None, AssembleOptions::default()).unwrap();
        let entries = read_entries(&fs::read(&path).unwrap());
        assert!(!entries.iter().any(|(name, _)| name.contains("images/cover")));
    }
}
