//! 解析与导出模块入口。
//!
//! 负责正文清洗，以及把章节内容与封面导出为 txt/epub。

pub mod assembler;
pub mod epub_generator;
pub mod image_utils;
pub mod parser;
pub mod txt_writer;
