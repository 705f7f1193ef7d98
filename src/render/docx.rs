use std::io::{Cursor, Write as _};

use anyhow::Context as _;
use chrono::Utc;
use zip::write::SimpleFileOptions;

use super::{Rendered, Renderer};
use crate::project::{Chapter, Project};

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Minimal WordprocessingML writer: title page, front matter, one heading
/// plus body paragraphs per chapter, page breaks in between.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxRenderer;

impl Renderer for DocxRenderer {
    fn render(&self, project: &Project) -> anyhow::Result<Rendered> {
        let document = render_document_xml(project);
        let core = render_core_xml(project);

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        let parts: [(&str, &str); 6] = [
            ("[Content_Types].xml", CONTENT_TYPES_XML),
            ("_rels/.rels", ROOT_RELS_XML),
            ("word/_rels/document.xml.rels", DOCUMENT_RELS_XML),
            ("word/styles.xml", STYLES_XML),
            ("docProps/core.xml", &core),
            ("word/document.xml", &document),
        ];
        for (name, body) in parts {
            zip.start_file(name, options)
                .with_context(|| format!("docx start_file {name}"))?;
            zip.write_all(body.as_bytes())
                .with_context(|| format!("docx write {name}"))?;
        }

        let bytes = zip.finish().context("docx finish zip")?.into_inner();
        Ok(Rendered {
            file_name: file_name_for(project),
            content_type: DOCX_CONTENT_TYPE.to_owned(),
            bytes,
        })
    }
}

fn file_name_for(project: &Project) -> String {
    let title = if project.metadata.book_title.trim().is_empty() {
        &project.metadata.topic
    } else {
        &project.metadata.book_title
    };
    let slug: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        format!("{}.docx", project.id)
    } else {
        format!("{slug}.docx")
    }
}

fn render_document_xml(project: &Project) -> String {
    let meta = &project.metadata;
    let mut body = String::new();

    body.push_str(&paragraph("Title", &meta.book_title));
    if !meta.sub_title.trim().is_empty() {
        body.push_str(&paragraph("Subtitle", &meta.sub_title));
    }
    if !meta.author_name.trim().is_empty() {
        body.push_str(&paragraph("Author", &meta.author_name));
    }

    for (heading, text) in [
        ("Dedicatória", meta.dedication.as_deref()),
        ("Agradecimentos", meta.acknowledgments.as_deref()),
    ] {
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            body.push_str(PAGE_BREAK);
            body.push_str(&paragraph("Heading1", heading));
            push_text(&mut body, text);
        }
    }

    let mut chapters: Vec<&Chapter> = project.structure.iter().collect();
    chapters.sort_by_key(|c| c.id);

    body.push_str(PAGE_BREAK);
    body.push_str(&paragraph("Heading1", "Sumário"));
    for chapter in &chapters {
        body.push_str(&paragraph("TocEntry", &chapter.title));
    }

    for chapter in chapters {
        body.push_str(PAGE_BREAK);
        body.push_str(&paragraph("Heading1", &chapter.title));
        push_text(&mut body, &chapter.content);
    }

    if let Some(about) = meta.about_author.as_deref().filter(|t| !t.trim().is_empty()) {
        body.push_str(PAGE_BREAK);
        body.push_str(&paragraph("Heading1", "Sobre o autor"));
        push_text(&mut body, about);
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>{body}<w:sectPr><w:pgSz w:w="8391" w:h="11906"/><w:pgMar w:top="1134" w:right="1134" w:bottom="1134" w:left="1134" w:header="567" w:footer="567" w:gutter="0"/></w:sectPr></w:body>
</w:document>"#
    )
}

/// One paragraph per non-blank line; `#` headings become Heading2.
fn push_text(out: &mut String, text: &str) {
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.trim_start_matches('#') {
            rest if rest.len() < line.len() => out.push_str(&paragraph("Heading2", rest.trim())),
            _ => out.push_str(&paragraph("Normal", line)),
        }
    }
}

fn paragraph(style: &str, text: &str) -> String {
    format!(
        r#"<w:p><w:pPr><w:pStyle w:val="{style}"/></w:pPr><w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
        xml_escape(text)
    )
}

const PAGE_BREAK: &str = r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#;

fn render_core_xml(project: &Project) -> String {
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<dc:title>{title}</dc:title>
<dc:creator>{author}</dc:creator>
<dc:language>{lang}</dc:language>
<dcterms:created xsi:type="dcterms:W3CDTF">{now}</dcterms:created>
</cp:coreProperties>"#,
        title = xml_escape(&project.metadata.book_title),
        author = xml_escape(&project.metadata.author_name),
        lang = xml_escape(&project.metadata.language),
    )
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
<Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/>
<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>
</Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>
</Relationships>"#;

const DOCUMENT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
</Relationships>"#;

const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:pPr><w:spacing w:after="160" w:line="300" w:lineRule="auto"/><w:jc w:val="both"/></w:pPr><w:rPr><w:rFonts w:ascii="Georgia" w:hAnsi="Georgia"/><w:sz w:val="22"/></w:rPr></w:style>
<w:style w:type="paragraph" w:styleId="Title"><w:name w:val="Title"/><w:basedOn w:val="Normal"/><w:pPr><w:jc w:val="center"/><w:spacing w:before="2400" w:after="240"/></w:pPr><w:rPr><w:b/><w:sz w:val="52"/></w:rPr></w:style>
<w:style w:type="paragraph" w:styleId="Subtitle"><w:name w:val="Subtitle"/><w:basedOn w:val="Normal"/><w:pPr><w:jc w:val="center"/></w:pPr><w:rPr><w:i/><w:sz w:val="30"/></w:rPr></w:style>
<w:style w:type="paragraph" w:styleId="Author"><w:name w:val="Author"/><w:basedOn w:val="Normal"/><w:pPr><w:jc w:val="center"/><w:spacing w:before="1200"/></w:pPr><w:rPr><w:sz w:val="26"/></w:rPr></w:style>
<w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:pPr><w:keepNext/><w:jc w:val="left"/><w:spacing w:before="480" w:after="240"/><w:outlineLvl w:val="0"/></w:pPr><w:rPr><w:b/><w:sz w:val="36"/></w:rPr></w:style>
<w:style w:type="paragraph" w:styleId="Heading2"><w:name w:val="heading 2"/><w:basedOn w:val="Normal"/><w:pPr><w:keepNext/><w:jc w:val="left"/><w:spacing w:before="240" w:after="120"/><w:outlineLvl w:val="1"/></w:pPr><w:rPr><w:b/><w:sz w:val="26"/></w:rPr></w:style>
<w:style w:type="paragraph" w:styleId="TocEntry"><w:name w:val="TOC Entry"/><w:basedOn w:val="Normal"/><w:pPr><w:jc w:val="left"/><w:spacing w:after="60"/></w:pPr></w:style>
</w:styles>"#;

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use super::*;
    use crate::project::{NewProject, Project};

    fn sample() -> Project {
        let mut project = Project::new(
            &NewProject {
                topic: "Café & Negócios".to_owned(),
                email: "a@b.com".to_owned(),
                name: "Ana".to_owned(),
                ..NewProject::default()
            },
            true,
        );
        project.metadata.book_title = "Café & Negócios <2ª edição>".to_owned();
        project.metadata.dedication = Some("Para a minha família.".to_owned());
        project.structure = vec![
            Chapter {
                id: 1,
                title: "Primeiros passos".to_owned(),
                intro: String::new(),
                content: "## Contexto\nTexto do capítulo.".to_owned(),
                is_generated: true,
            },
            Chapter {
                id: 0,
                title: "Introdução".to_owned(),
                intro: String::new(),
                content: "Bem-vindo.".to_owned(),
                is_generated: true,
            },
        ];
        project
    }

    #[test]
    fn renders_a_zip_with_escaped_document() -> anyhow::Result<()> {
        let rendered = DocxRenderer.render(&sample())?;
        assert_eq!(rendered.content_type, DOCX_CONTENT_TYPE);
        assert_eq!(rendered.file_name, "café-negócios-2ª-edição.docx");

        let mut archive = zip::ZipArchive::new(Cursor::new(rendered.bytes))?;
        let mut document = String::new();
        archive
            .by_name("word/document.xml")?
            .read_to_string(&mut document)?;
        assert!(document.contains("Café &amp; Negócios &lt;2ª edição&gt;"));
        assert!(document.contains("Para a minha família."));
        assert!(document.contains(r#"<w:pStyle w:val="Heading2"/></w:pPr><w:r><w:t xml:space="preserve">Contexto"#));

        let intro = document.find("Bem-vindo.").expect("intro rendered");
        let first = document.find("Texto do capítulo.").expect("chapter rendered");
        assert!(intro < first);
        assert!(archive.by_name("[Content_Types].xml").is_ok());
        Ok(())
    }
}
