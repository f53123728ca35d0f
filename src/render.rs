//! Renders ledger records onto square JPEG cards.
//!
//! Each record gets a title card (a coloured header label above the tip) and,
//! when the post has body text, a second card with that text. Cards live under
//! `{output_dir}/generated/` until they are published, then move to
//! `{output_dir}/uploaded/`. A record whose title card exists in either
//! directory is never drawn again.

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

use crate::contract::{PostRecord, RenderError, RenderOutcome, Renderer};

pub const CANVAS_SIZE: u32 = 1500;
pub const MAX_TITLE_LEN: usize = 400;
pub const MIN_SELFTEXT_LEN: usize = 5;
pub const DEFAULT_HEADER_TEXT: &str = "ULPT:";

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const LEFT_PADDING: u32 = 150;
const BOX_WIDTH: u32 = 1200;
const LINE_SPACING: f32 = 1.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontPaths {
    #[serde(default = "default_header_font")]
    pub header: PathBuf,
    #[serde(default = "default_title_font")]
    pub title: PathBuf,
    #[serde(default = "default_body_font")]
    pub body: PathBuf,
}

fn default_header_font() -> PathBuf {
    PathBuf::from("fonts/Helvetica95Black.ttf")
}

fn default_title_font() -> PathBuf {
    PathBuf::from("fonts/Helvetica65Medium.ttf")
}

fn default_body_font() -> PathBuf {
    PathBuf::from("fonts/Helvetica55Roman.ttf")
}

impl Default for FontPaths {
    fn default() -> Self {
        Self {
            header: default_header_font(),
            title: default_title_font(),
            body: default_body_font(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_header_text")]
    pub header_text: String,
    #[serde(default)]
    pub fonts: FontPaths,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("content/images")
}

fn default_header_text() -> String {
    DEFAULT_HEADER_TEXT.to_string()
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            header_text: default_header_text(),
            fonts: FontPaths::default(),
        }
    }
}

/// Reddit ids are base-36; anything else could escape the card directories.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Where cards for a record live on disk.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    root: PathBuf,
}

impl ImageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.root.join("generated")
    }

    pub fn uploaded_dir(&self) -> PathBuf {
        self.root.join("uploaded")
    }

    pub fn title_path(&self, id: &str) -> PathBuf {
        self.generated_dir().join(format!("title_{id}.jpg"))
    }

    pub fn self_text_path(&self, id: &str) -> PathBuf {
        self.generated_dir().join(format!("self_text_{id}.jpg"))
    }

    /// True when the title card exists, published or not. The title card is
    /// persisted last, so its presence means every card of the record exists.
    pub fn is_generated(&self, id: &str) -> bool {
        if !is_valid_id(id) {
            return false;
        }
        let title = self.title_path(id);
        let uploaded = self.uploaded_dir().join(format!("title_{id}.jpg"));
        title.is_file() || uploaded.is_file()
    }

    /// Cards waiting in `generated/` for `id`, title card first.
    pub fn generated_images(&self, id: &str) -> Vec<PathBuf> {
        if !is_valid_id(id) {
            return Vec::new();
        }
        [self.title_path(id), self.self_text_path(id)]
            .into_iter()
            .filter(|path| path.is_file())
            .collect()
    }

    /// Moves a generated card into `uploaded/`, keeping its file name.
    pub fn move_to_uploaded(&self, path: &Path) -> std::io::Result<PathBuf> {
        let name = path.file_name().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no file name", path.display()),
            )
        })?;
        let target_dir = self.uploaded_dir();
        fs::create_dir_all(&target_dir)?;
        let target = target_dir.join(name);
        fs::rename(path, &target)?;
        debug!(from = %path.display(), to = %target.display(), "Moved card to uploaded");
        Ok(target)
    }
}

/// The texts that go on a record's cards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardTexts<'a> {
    pub title: &'a str,
    pub selftext: Option<&'a str>,
}

/// Picks the card texts for a record, or `None` when it cannot be drawn.
///
/// A title-only card needs a title shorter than [`MAX_TITLE_LEN`]. When the
/// post has body text of at least [`MIN_SELFTEXT_LEN`] characters both cards
/// are drawn and the title length is not checked.
pub fn select_texts(record: &PostRecord) -> Option<CardTexts<'_>> {
    let title = record.title.trim();
    if title.is_empty() {
        return None;
    }
    let selftext = record.selftext.trim();
    if selftext.chars().count() >= MIN_SELFTEXT_LEN {
        return Some(CardTexts {
            title,
            selftext: Some(selftext),
        });
    }
    if title.chars().count() >= MAX_TITLE_LEN {
        return None;
    }
    Some(CardTexts {
        title,
        selftext: None,
    })
}

/// Greedy word wrap. `measure` returns the rendered width of a string.
/// Newlines in `text` start a new paragraph; a word wider than `max_width`
/// gets a line of its own.
pub fn wrap_text(text: &str, max_width: u32, measure: impl Fn(&str) -> u32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current.push_str(word);
                continue;
            }
            let candidate = format!("{current} {word}");
            if measure(&candidate) <= max_width {
                current = candidate;
            } else {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            }
        }
        lines.push(current);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
}

/// A text block confined to a horizontal band of the canvas.
#[derive(Debug, Clone, Copy)]
pub struct TextBox {
    pub left: u32,
    pub width: u32,
    pub upper: u32,
    pub lower: u32,
    pub size: f32,
    pub color: Rgb<u8>,
    pub align: Align,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedLine {
    pub x: i32,
    pub y: i32,
    pub text: String,
}

/// Positions wrapped lines so the block is vertically centred in the band.
/// A block taller than its band starts at the band's top.
pub fn place_lines(
    lines: &[String],
    tb: &TextBox,
    measure: impl Fn(&str) -> u32,
) -> Vec<PlacedLine> {
    let line_height = (tb.size * LINE_SPACING).round() as u32;
    let block = line_height * lines.len() as u32;
    let band = tb.lower.saturating_sub(tb.upper);
    let top = tb.upper + band.saturating_sub(block) / 2;
    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            let x = match tb.align {
                Align::Left => tb.left,
                Align::Center => tb.left + tb.width.saturating_sub(measure(line)) / 2,
            };
            PlacedLine {
                x: x as i32,
                y: (top + idx as u32 * line_height) as i32,
                text: line.clone(),
            }
        })
        .collect()
}

fn header_box() -> TextBox {
    TextBox {
        left: LEFT_PADDING,
        width: BOX_WIDTH,
        upper: 0,
        lower: 750,
        size: 180.0,
        color: Rgb([159, 4, 4]),
        align: Align::Center,
    }
}

fn title_box() -> TextBox {
    TextBox {
        left: LEFT_PADDING,
        width: BOX_WIDTH,
        upper: 450,
        lower: 1350,
        size: 60.0,
        color: Rgb([33, 32, 32]),
        align: Align::Left,
    }
}

fn body_box() -> TextBox {
    TextBox {
        left: LEFT_PADDING,
        width: BOX_WIDTH,
        upper: 300,
        lower: 1200,
        size: 60.0,
        color: Rgb([0, 0, 0]),
        align: Align::Left,
    }
}

fn load_font(path: &Path) -> Result<FontVec, RenderError> {
    let bytes = fs::read(path).map_err(|e| {
        error!(error = ?e, path = %path.display(), "Failed to read font file");
        RenderError::Font(path.to_path_buf())
    })?;
    FontVec::try_from_vec(bytes).map_err(|e| {
        error!(error = ?e, path = %path.display(), "Failed to parse font file");
        RenderError::Font(path.to_path_buf())
    })
}

fn draw_box(img: &mut RgbImage, font: &FontVec, text: &str, tb: &TextBox) {
    let scale = PxScale::from(tb.size);
    let measure = |s: &str| text_size(scale, font, s).0;
    let lines = wrap_text(text, tb.width, measure);
    for line in place_lines(&lines, tb, measure) {
        draw_text_mut(img, tb.color, line.x, line.y, scale, font, &line.text);
    }
}

/// Encodes into a hidden temp file in `dir`; nothing is visible under a card
/// name until the file is persisted.
fn stage_jpeg(img: &RgbImage, dir: &Path) -> Result<NamedTempFile, RenderError> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".card-")
        .suffix(".jpg")
        .tempfile_in(dir)?;
    img.write_to(tmp.as_file_mut(), ImageFormat::Jpeg)
        .map_err(|e| RenderError::Image(e.to_string()))?;
    Ok(tmp)
}

/// Draws cards with `imageproc` using TrueType fonts from disk.
pub struct ImageRenderer {
    layout: ImageLayout,
    config: RenderConfig,
}

impl ImageRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            layout: ImageLayout::new(config.output_dir.clone()),
            config,
        }
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn blank_canvas() -> RgbImage {
        RgbImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, BACKGROUND)
    }
}

impl Renderer for ImageRenderer {
    fn render(&self, record: &PostRecord) -> Result<RenderOutcome, RenderError> {
        if !is_valid_id(&record.id) {
            error!(id = %record.id, "Refusing to build card paths from post id");
            return Err(RenderError::InvalidId(record.id.clone()));
        }
        if self.layout.is_generated(&record.id) {
            debug!(id = %record.id, "Card already generated, skipping");
            return Ok(RenderOutcome::AlreadyGenerated);
        }
        let Some(texts) = select_texts(record) else {
            info!(id = %record.id, "Record text outside renderable limits");
            return Ok(RenderOutcome::NotRenderable);
        };

        let fonts = &self.config.fonts;
        let header_font = load_font(&fonts.header)?;
        let title_font = load_font(&fonts.title)?;
        let body_font = match texts.selftext {
            Some(_) => Some(load_font(&fonts.body)?),
            None => None,
        };

        let mut title_img = Self::blank_canvas();
        draw_box(&mut title_img, &header_font, &self.config.header_text, &header_box());
        draw_box(&mut title_img, &title_font, texts.title, &title_box());

        let dir = self.layout.generated_dir();
        fs::create_dir_all(&dir)?;
        let mut staged = vec![(
            self.layout.title_path(&record.id),
            stage_jpeg(&title_img, &dir)?,
        )];
        if let (Some(selftext), Some(font)) = (texts.selftext, body_font.as_ref()) {
            let mut body_img = Self::blank_canvas();
            draw_box(&mut body_img, font, selftext, &body_box());
            let body_path = self.layout.self_text_path(&record.id);
            staged.push((body_path, stage_jpeg(&body_img, &dir)?));
        }

        let written: Vec<PathBuf> = staged.iter().map(|(path, _)| path.clone()).collect();
        // title card last: it marks the record as generated
        for (path, tmp) in staged.into_iter().rev() {
            tmp.persist(&path).map_err(|e| RenderError::Io(e.error))?;
        }

        info!(id = %record.id, cards = written.len(), "Cards generated");
        Ok(RenderOutcome::Rendered(written))
    }
}
