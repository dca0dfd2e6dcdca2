//! 输出解析函数

use super::types::{PackageDetail, SourceInfo, TableKind, TableRow};

/// 输出中出现这些关键字（不区分大小写）即视为错误行
pub const ERROR_KEYWORDS: &[&str] = &["fail", "cannot find", "error", "no installed package found"];

/// 清理单行终端输出：只保留最后一帧 `\r` 刷新内容，去掉 ANSI 转义序列和控制字符
pub fn clean_terminal_output(input: &str) -> String {
    // winget 的旋转指示器和进度条通过 \r 就地刷新，终端上最终可见的是最后一帧
    let trimmed = input.trim_end_matches(['\r', '\n']);
    let frame = trimmed.rsplit('\r').next().unwrap_or("");

    let mut result = String::with_capacity(frame.len());
    let mut chars = frame.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            c if c.is_control() && c != '\t' => {}
            _ => result.push(c),
        }
    }

    result
}

/// 空行或纯边框/旋转指示字符组成的行
pub fn is_decoration_line(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| matches!(c, '-' | '\\' | '|' | '/') || c.is_whitespace())
}

/// 关键字匹配的错误分类（启发式，"error-free" 之类也会命中）
pub fn is_error_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    ERROR_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn is_border(stripped: &str) -> bool {
    stripped.chars().all(|c| c == '-')
}

fn is_table_header(stripped: &str, kind: TableKind) -> bool {
    stripped.starts_with("Name") && kind.header_tokens().iter().all(|t| stripped.contains(t))
}

/// 解析 winget search / list / upgrade 的表格输出
///
/// 表头之前的内容（警告、横幅）全部丢弃；找不到表头时返回空列表。
/// 名称中可能含空格：列数多于固定列时，把尾部固定列之前的部分重新拼成名称。
pub fn parse_table(output: &str, kind: TableKind) -> Vec<TableRow> {
    let trailing = kind.trailing_columns();
    let mut header_found = false;
    let mut rows = Vec::new();

    for line in output.lines() {
        let cleaned = clean_terminal_output(line);
        let stripped = cleaned.trim();
        if stripped.is_empty() || is_border(stripped) {
            continue;
        }
        if !header_found {
            header_found = is_table_header(stripped, kind);
            continue;
        }

        let parts: Vec<&str> = stripped.split_whitespace().collect();
        if parts.len() <= trailing + 1 {
            rows.push(TableRow(parts.iter().map(|s| s.to_string()).collect()));
        } else {
            let split = parts.len() - trailing;
            let mut fields = Vec::with_capacity(trailing + 1);
            fields.push(parts[..split].join(" "));
            fields.extend(parts[split..].iter().map(|s| s.to_string()));
            rows.push(TableRow(fields));
        }
    }

    rows
}

/// 解析 winget show 的详情输出
///
/// 顶格且含冒号的行开始一个新字段（只按第一个冒号切分）；
/// 缩进行或不含冒号的行是上一个字段的续行，以换行拼接。
pub fn parse_package_detail(output: &str) -> PackageDetail {
    let mut detail = PackageDetail::default();
    let mut current: Option<(String, String)> = None;

    for line in output.lines() {
        let cleaned = clean_terminal_output(line);
        if cleaned.trim().is_empty() {
            continue;
        }

        let indented = cleaned.starts_with(' ') || cleaned.starts_with('\t');
        if !indented {
            if let Some(colon_pos) = cleaned.find(':') {
                let key = cleaned[..colon_pos].trim();
                if !key.is_empty() {
                    if let Some((k, v)) = current.take() {
                        detail.insert(k, v);
                    }
                    let value = cleaned[colon_pos + 1..].trim().to_string();
                    current = Some((key.to_string(), value));
                    continue;
                }
            }
        }

        // 第一个字段之前的内容（如 "Found Foo [Foo.Bar]"）直接忽略
        if let Some((_, value)) = current.as_mut() {
            if !value.is_empty() {
                value.push('\n');
            }
            value.push_str(cleaned.trim());
        }
    }

    if let Some((k, v)) = current {
        detail.insert(k, v);
    }

    detail
}

/// 解析 winget source list 的输出
pub fn parse_sources(output: &str) -> Vec<SourceInfo> {
    let mut type_column: Option<usize> = None;
    let mut header_found = false;
    let mut sources = Vec::new();

    for line in output.lines() {
        let cleaned = clean_terminal_output(line);
        let stripped = cleaned.trim();
        if stripped.is_empty() || is_border(stripped) {
            continue;
        }
        if !header_found {
            if stripped.starts_with("Name") && stripped.contains("Argument") {
                header_found = true;
                type_column = stripped.split_whitespace().position(|t| t == "Type");
            }
            continue;
        }

        let parts: Vec<&str> = stripped.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        sources.push(SourceInfo {
            name: parts[0].to_string(),
            argument: parts[1].to_string(),
            source_type: type_column
                .and_then(|idx| parts.get(idx))
                .map(|s| s.to_string()),
        });
    }

    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_OUTPUT: &str = "\
Warning: source agreement required
Name                      Id                 Version Source
--------------------------------------------------------------
Microsoft Visual C++ 2015  Microsoft.VCRedist  14.0  winget
7-Zip                      7zip.7zip           24.07 winget
";

    #[test]
    fn test_parse_table_rejoins_names_with_spaces() {
        let rows = parse_table(SEARCH_OUTPUT, TableKind::Listing);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].fields(),
            ["Microsoft Visual C++ 2015", "Microsoft.VCRedist", "14.0", "winget"]
        );
        assert_eq!(rows[1].fields(), ["7-Zip", "7zip.7zip", "24.07", "winget"]);
    }

    #[test]
    fn test_parse_table_without_header_is_empty() {
        let output = "No package found matching input criteria.\nFoo Foo.Bar 1.0 winget\n";
        assert!(parse_table(output, TableKind::Listing).is_empty());
        assert!(parse_table("", TableKind::Listing).is_empty());
    }

    #[test]
    fn test_parse_table_short_rows_pass_through() {
        let output = "Name Id Version Source\n---\nLegacy App  ARP\\Machine\\Legacy  1.2\n";
        let rows = parse_table(output, TableKind::Listing);
        // 四个 token，不足以拆出名称，原样保留
        assert_eq!(rows[0].fields(), ["Legacy", "App", "ARP\\Machine\\Legacy", "1.2"]);
        let output = "Name Id Version Source\nTool Tool.Id 1.0\n";
        assert_eq!(parse_table(output, TableKind::Listing)[0].fields(), ["Tool", "Tool.Id", "1.0"]);
    }

    #[test]
    fn test_parse_table_upgrades_needs_available_column() {
        let output = "\
Name            Id           Version Available Source
------------------------------------------------------
Mozilla Firefox Mozilla.Firefox 126.0 127.0.1 winget
";
        let rows = parse_table(output, TableKind::Upgrades);
        assert_eq!(
            rows[0].fields(),
            ["Mozilla Firefox", "Mozilla.Firefox", "126.0", "127.0.1", "winget"]
        );
        assert_eq!(rows[0].available(), Some("127.0.1"));

        // 列表表头没有 Available，按 upgrade 解析时找不到表头
        assert!(parse_table(SEARCH_OUTPUT, TableKind::Upgrades).is_empty());
    }

    #[test]
    fn test_parse_table_strips_spinner_frames_and_ansi() {
        let output = "\r   - \r   \\ \r\x1b[2KName Id Version Source\n-----\nGit Git.Git 2.44.0 winget\n";
        let rows = parse_table(output, TableKind::Listing);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(), "Git.Git");
    }

    #[test]
    fn test_parse_detail_continuation() {
        let detail =
            parse_package_detail("Id: Foo.Bar\nDescription: line one\nstill line one\nVersion: 1.0");
        assert_eq!(detail.fields.len(), 3);
        assert_eq!(detail.get("Id"), Some("Foo.Bar"));
        assert_eq!(detail.get("Description"), Some("line one\nstill line one"));
        assert_eq!(detail.get("Version"), Some("1.0"));
    }

    #[test]
    fn test_parse_detail_colons_in_values_and_continuations() {
        let output = "\
Found Foo [Foo.Bar]
Homepage: https://example.com/foo
Release Notes:
  see https://example.com/notes
  for details: all of them
";
        let detail = parse_package_detail(output);
        assert_eq!(detail.get("Homepage"), Some("https://example.com/foo"));
        assert_eq!(
            detail.get("Release Notes"),
            Some("see https://example.com/notes\nfor details: all of them")
        );
        assert_eq!(detail.fields.len(), 2);
    }

    #[test]
    fn test_parse_detail_without_fields_is_empty() {
        assert!(parse_package_detail("No package found matching input criteria.\n\n").is_empty());
    }

    #[test]
    fn test_parse_sources() {
        let output = "\
Name    Argument                                      Explicit
---------------------------------------------------------------
msstore https://storeedgefd.dsx.mp.microsoft.com/v9.0 false
winget  https://cdn.winget.microsoft.com/cache        false
";
        let sources = parse_sources(output);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].name, "winget");
        assert_eq!(sources[1].argument, "https://cdn.winget.microsoft.com/cache");
        assert_eq!(sources[1].source_type, None);

        let typed = parse_sources("Name Argument Type\nlocal C:\\repo Microsoft.Rest\n");
        assert_eq!(typed[0].source_type.as_deref(), Some("Microsoft.Rest"));
    }

    #[test]
    fn test_error_classification_is_case_insensitive() {
        assert!(is_error_line("An unexpected ERROR occurred"));
        assert!(is_error_line("Installer failed with exit code: 1603"));
        assert!(is_error_line("Cannot find package"));
        assert!(is_error_line("No installed package found matching input criteria."));
        assert!(!is_error_line("Successfully installed"));
    }

    #[test]
    fn test_decoration_lines() {
        assert!(is_decoration_line("----------"));
        assert!(is_decoration_line("   "));
        assert!(is_decoration_line(" \\ "));
        assert!(!is_decoration_line("Downloading"));
    }

    #[test]
    fn test_clean_terminal_output_keeps_last_frame() {
        assert_eq!(clean_terminal_output("10%\r50%\rDone\r\n"), "Done");
        assert_eq!(clean_terminal_output("\x1b[32mOK\x1b[0m"), "OK");
    }
}
