//! Text extraction for uploaded documents (PDF, DOCX, legacy DOC).
//!
//! Each supported [`FileCategory`] has a [`DocumentFormat`] that knows its
//! magic bytes and how to turn raw bytes into plain UTF-8 text. Extraction
//! never panics across the API: parser panics are caught and reported as
//! [`ExtractError::Aborted`].
//!
//! Pages are joined with `\n`, DOCX paragraphs end with `\n`, and DOC
//! paragraph marks become `\n`. Text is otherwise returned untrimmed; the
//! chunker trims.

use std::io::{Cursor, Read};

use docrag_core::file_type::FileCategory;
use quick_xml::events::Event;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to parse PDF: {0}")]
    Pdf(String),

    #[error("Failed to parse DOCX: {0}")]
    Docx(String),

    #[error("Failed to parse DOC: {0}")]
    Doc(String),

    #[error("{0} document is password protected")]
    Encrypted(FileCategory),

    #[error("{category} parser aborted: {message}")]
    Aborted {
        category: FileCategory,
        message: String,
    },
}

/// Plain text pulled from a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    /// Page count, when the format has pages (PDF only).
    pub pages: Option<usize>,
}

impl ExtractedText {
    fn without_pages(text: String) -> Self {
        Self { text, pages: None }
    }
}

/// A document format docrag can read.
pub trait DocumentFormat: Send + Sync {
    fn category(&self) -> FileCategory;

    /// Whether `bytes` start with this format's magic number.
    fn validate_signature(&self, bytes: &[u8]) -> bool {
        self.category().matches_signature(bytes)
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError>;
}

pub struct PdfFormat;
pub struct DocxFormat;
pub struct DocFormat;

/// The format handler for a category.
pub fn format_for(category: FileCategory) -> &'static dyn DocumentFormat {
    match category {
        FileCategory::Pdf => &PdfFormat,
        FileCategory::Docx => &DocxFormat,
        FileCategory::Doc => &DocFormat,
    }
}

/// Extract text synchronously.
pub fn extract_text(category: FileCategory, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    format_for(category).extract(bytes)
}

/// Extract text on the blocking thread pool. Parser panics become
/// [`ExtractError::Aborted`].
pub async fn extract_text_blocking(
    category: FileCategory,
    bytes: std::sync::Arc<Vec<u8>>,
) -> Result<ExtractedText, ExtractError> {
    tokio::task::spawn_blocking(move || extract_text(category, &bytes))
        .await
        .map_err(|e| ExtractError::Aborted {
            category,
            message: e.to_string(),
        })?
}

// ============ PDF ============

impl DocumentFormat for PdfFormat {
    fn category(&self) -> FileCategory {
        FileCategory::Pdf
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(ExtractedText {
            pages: Some(pages.len()),
            text: pages.join("\n"),
        })
    }
}

// ============ DOCX ============

impl DocumentFormat for DocxFormat {
    fn category(&self) -> FileCategory {
        FileCategory::Docx
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ExtractError::Docx(e.to_string()))?;
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
        docx_body_text(&xml).map(ExtractedText::without_pages)
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Docx(format!("{name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Docx(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Collect `w:t` runs; paragraphs end with `\n`, `w:tab` is `\t`, breaks are `\n`.
fn docx_body_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

// ============ DOC (Word 97-2003 binary) ============

const WORD_IDENT: u16 = 0xA5EC;
const FIB_FLAGS: usize = 0x0A;
const FLAG_ENCRYPTED: u16 = 0x0100;
const FLAG_WHICH_TABLE: u16 = 0x0200;
const FIB_CSW: usize = 32;
/// Index of the fcClx/lcbClx pair in fibRgFcLcb.
const CLX_PAIR_INDEX: usize = 33;
const FC_COMPRESSED: u32 = 0x4000_0000;
const FC_MASK: u32 = 0x3FFF_FFFF;

impl DocumentFormat for DocFormat {
    fn category(&self) -> FileCategory {
        FileCategory::Doc
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
        let mut compound =
            cfb::CompoundFile::open(Cursor::new(bytes)).map_err(|e| ExtractError::Doc(e.to_string()))?;

        let word = read_cfb_stream(&mut compound, "/WordDocument")?;
        let fib = Fib::parse(&word)?;
        if fib.encrypted {
            return Err(ExtractError::Encrypted(FileCategory::Doc));
        }

        let table_name = if fib.one_table { "/1Table" } else { "/0Table" };
        let table = read_cfb_stream(&mut compound, table_name)?;
        let clx = slice(&table, fib.fc_clx as usize, fib.lcb_clx as usize)
            .ok_or_else(|| ExtractError::Doc("piece table out of bounds".to_string()))?;

        let raw = read_pieces(&word, clx, fib.ccp_text as usize)?;
        Ok(ExtractedText::without_pages(clean_doc_text(&raw)))
    }
}

fn read_cfb_stream(
    compound: &mut cfb::CompoundFile<Cursor<&[u8]>>,
    path: &str,
) -> Result<Vec<u8>, ExtractError> {
    let mut stream = compound
        .open_stream(path)
        .map_err(|e| ExtractError::Doc(format!("{path}: {e}")))?;
    let mut out = Vec::new();
    stream
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Doc(e.to_string()))?;
    Ok(out)
}

/// The parts of the File Information Block needed to locate the text.
struct Fib {
    encrypted: bool,
    one_table: bool,
    ccp_text: u32,
    fc_clx: u32,
    lcb_clx: u32,
}

impl Fib {
    fn parse(word: &[u8]) -> Result<Self, ExtractError> {
        let short = || ExtractError::Doc("WordDocument stream too short".to_string());

        if read_u16(word, 0).ok_or_else(short)? != WORD_IDENT {
            return Err(ExtractError::Doc("not a Word binary document".to_string()));
        }
        let flags = read_u16(word, FIB_FLAGS).ok_or_else(short)?;

        let csw = read_u16(word, FIB_CSW).ok_or_else(short)? as usize;
        let cslw_pos = FIB_CSW + 2 + csw * 2;
        let cslw = read_u16(word, cslw_pos).ok_or_else(short)? as usize;
        let rg_lw = cslw_pos + 2;
        let ccp_text = read_u32(word, rg_lw + 12).ok_or_else(short)?;

        let cb_pos = rg_lw + cslw * 4;
        let cb_rg_fc_lcb = read_u16(word, cb_pos).ok_or_else(short)? as usize;
        if cb_rg_fc_lcb <= CLX_PAIR_INDEX {
            return Err(ExtractError::Doc("FIB has no piece table entry".to_string()));
        }
        let clx_pos = cb_pos + 2 + CLX_PAIR_INDEX * 8;

        Ok(Self {
            encrypted: flags & FLAG_ENCRYPTED != 0,
            one_table: flags & FLAG_WHICH_TABLE != 0,
            ccp_text,
            fc_clx: read_u32(word, clx_pos).ok_or_else(short)?,
            lcb_clx: read_u32(word, clx_pos + 4).ok_or_else(short)?,
        })
    }
}

/// Walk the piece table and decode up to `ccp_text` characters of main text.
fn read_pieces(word: &[u8], clx: &[u8], ccp_text: usize) -> Result<String, ExtractError> {
    let bad = |msg: &str| ExtractError::Doc(msg.to_string());

    // Skip Prc entries until the Pcdt.
    let mut pos = 0;
    let plc = loop {
        match clx.get(pos) {
            Some(0x01) => {
                let cb = read_u16(clx, pos + 1).ok_or_else(|| bad("truncated Prc"))? as usize;
                pos += 3 + cb;
            }
            Some(0x02) => {
                let lcb = read_u32(clx, pos + 1).ok_or_else(|| bad("truncated Pcdt"))? as usize;
                break slice(clx, pos + 5, lcb).ok_or_else(|| bad("truncated PlcPcd"))?;
            }
            _ => return Err(bad("malformed piece table")),
        }
    };

    if plc.len() < 4 {
        return Err(bad("empty piece table"));
    }
    let n = (plc.len() - 4) / 12;
    let pcd_base = 4 * (n + 1);

    let mut out = String::new();
    let mut remaining = ccp_text;
    for i in 0..n {
        if remaining == 0 {
            break;
        }
        let cp_start = read_u32(plc, i * 4).ok_or_else(|| bad("truncated CP"))? as usize;
        let cp_end = read_u32(plc, (i + 1) * 4).ok_or_else(|| bad("truncated CP"))? as usize;
        let count = cp_end.saturating_sub(cp_start).min(remaining);
        remaining -= count;

        let fc_raw = read_u32(plc, pcd_base + i * 8 + 2).ok_or_else(|| bad("truncated PCD"))?;
        let fc = (fc_raw & FC_MASK) as usize;
        if fc_raw & FC_COMPRESSED != 0 {
            let bytes = slice(word, fc / 2, count).ok_or_else(|| bad("piece out of bounds"))?;
            out.extend(bytes.iter().map(|&b| cp1252_char(b)));
        } else {
            let bytes = slice(word, fc, count * 2).ok_or_else(|| bad("piece out of bounds"))?;
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            out.extend(char::decode_utf16(units).map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER)));
        }
    }
    Ok(out)
}

/// Map Word control characters to plain text and drop field instructions.
fn clean_doc_text(raw: &str) -> String {
    // One entry per open field: false while in the instruction, true in the result.
    let mut fields: Vec<bool> = Vec::new();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\u{13}' => fields.push(false),
            '\u{14}' => {
                if let Some(top) = fields.last_mut() {
                    *top = true;
                }
            }
            '\u{15}' => {
                fields.pop();
            }
            _ if fields.last() == Some(&false) => {}
            '\r' | '\u{0B}' | '\u{0C}' => out.push('\n'),
            '\u{07}' | '\t' => out.push('\t'),
            '\u{1E}' => out.push('-'),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

fn cp1252_char(b: u8) -> char {
    const HIGH: [char; 32] = [
        '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8D}', 'Ž',
        '\u{8F}', '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ', '\u{9D}',
        'ž', 'Ÿ',
    ];
    match b {
        0x80..=0x9F => HIGH[(b - 0x80) as usize],
        _ => b as char,
    }
}

fn slice(bytes: &[u8], start: usize, len: usize) -> Option<&[u8]> {
    bytes.get(start..start.checked_add(len)?)
}

fn read_u16(bytes: &[u8], pos: usize) -> Option<u16> {
    slice(bytes, pos, 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], pos: usize) -> Option<u32> {
    slice(bytes, pos, 4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::{Cursor, Write};

    /// One-page PDF showing `text` in Helvetica, with a valid xref table.
    pub fn minimal_pdf(text: &str) -> Vec<u8> {
        let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
        let mut out = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n");
        let o1 = out.len();
        out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
        let o2 = out.len();
        out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
        let o3 = out.len();
        out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
        let o4 = out.len();
        out.extend_from_slice(
            format!(
                "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                content.len(),
                content
            )
            .as_bytes(),
        );
        let o5 = out.len();
        out.extend_from_slice(
            b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
        );
        let xref_start = out.len();
        out.extend_from_slice(b"xref\n0 6\n");
        out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
        for offset in [o1, o2, o3, o4, o5] {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
        out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
        out.extend_from_slice(b"%%EOF\n");
        out
    }

    /// Minimal Word 97 file whose main text is `text` (single compressed piece).
    pub fn minimal_doc(text: &str) -> Vec<u8> {
        const TEXT_OFFSET: usize = 1024;
        let encoded: Vec<u8> = text.chars().map(|c| c as u8).collect();

        let mut word = vec![0u8; TEXT_OFFSET];
        word[0..2].copy_from_slice(&0xA5ECu16.to_le_bytes());
        word[0x0A..0x0C].copy_from_slice(&0x0200u16.to_le_bytes());
        word[32..34].copy_from_slice(&14u16.to_le_bytes());
        word[62..64].copy_from_slice(&22u16.to_le_bytes());
        word[76..80].copy_from_slice(&(encoded.len() as u32).to_le_bytes());
        word[152..154].copy_from_slice(&93u16.to_le_bytes());

        let mut clx = vec![0x02];
        clx.extend_from_slice(&16u32.to_le_bytes());
        clx.extend_from_slice(&0u32.to_le_bytes());
        clx.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        clx.extend_from_slice(&0u16.to_le_bytes());
        clx.extend_from_slice(&(((TEXT_OFFSET * 2) as u32) | 0x4000_0000).to_le_bytes());
        clx.extend_from_slice(&0u16.to_le_bytes());

        word[418..422].copy_from_slice(&0u32.to_le_bytes());
        word[422..426].copy_from_slice(&(clx.len() as u32).to_le_bytes());
        word.extend_from_slice(&encoded);

        let mut compound = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        compound
            .create_stream("/WordDocument")
            .unwrap()
            .write_all(&word)
            .unwrap();
        compound
            .create_stream("/1Table")
            .unwrap()
            .write_all(&clx)
            .unwrap();
        compound.flush().unwrap();
        compound.into_inner().into_inner()
    }

    pub fn minimal_docx(xml_body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                xml_body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }
}
