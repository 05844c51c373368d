use crate::headermap::EncodeHeaderValue;
use crate::nom_utils::{explain_nom, make_context_error, make_span, IResult, Span};
use crate::{MailModelError, Result, SharedString};
use charset::Charset;
use chrono::{DateTime, FixedOffset};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, digit1, satisfy};
use nom::combinator::{all_consuming, map, map_res, opt, recognize, verify};
use nom::error::context;
use nom::multi::{fold_many0, many0, many1, separated_list1};
use nom::sequence::{delimited, preceded, terminated};
use nom::Parser as _;

/// Parses header values into their typed forms using the RFC 5322
/// grammar (including the obsolete productions that still show up in
/// real mail), with RFC 2047 encoded words and RFC 2231 parameter
/// continuations resolved during the parse.
pub struct Parser;

impl Parser {
    pub fn parse_mailbox_list_header(text: &str) -> Result<MailboxList> {
        parse_with(text, mailbox_list)
    }

    pub fn parse_mailbox_header(text: &str) -> Result<Mailbox> {
        parse_with(text, mailbox)
    }

    pub fn parse_address_list_header(text: &str) -> Result<AddressList> {
        parse_with(text, address_list)
    }

    pub fn parse_msg_id_header(text: &str) -> Result<MessageID> {
        parse_with(text, msg_id)
    }

    pub fn parse_msg_id_header_list(text: &str) -> Result<Vec<MessageID>> {
        parse_with(text, msg_id_list)
    }

    pub fn parse_content_id_header(text: &str) -> Result<MessageID> {
        parse_with(text, content_id)
    }

    pub fn parse_content_type_header(text: &str) -> Result<MimeParameters> {
        parse_with(text, content_type)
    }

    /// Content-Transfer-Encoding and Content-Disposition share the
    /// `token *(";" parameter)` shape
    pub fn parse_token_with_parameters_header(text: &str) -> Result<MimeParameters> {
        parse_with(text, token_with_parameters)
    }

    pub fn parse_unstructured_header(text: &str) -> Result<String> {
        parse_with(text, unstructured)
    }

    pub fn parse_keywords_header(text: &str) -> Result<Vec<String>> {
        parse_with(text, keywords)
    }
}

fn parse_with<'a, R, F>(text: &'a str, parser: F) -> Result<R>
where
    F: Fn(Span<'a>) -> IResult<'a, Span<'a>, R>,
{
    let input = make_span(text);
    match all_consuming(parser).parse(input) {
        Ok((_, result)) => Ok(result),
        Err(err) => Err(MailModelError::HeaderParse(format!(
            "{text}:\n{}",
            explain_nom(input, err)
        ))),
    }
}

// Character classes

fn is_utf8_non_ascii(c: char) -> bool {
    (c as u32) >= 0x80
}

fn is_vchar(c: char) -> bool {
    matches!(c, '\x21'..='\x7e') || is_utf8_non_ascii(c)
}

fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
        || is_utf8_non_ascii(c)
}

fn is_obs_no_ws_ctl(c: char) -> bool {
    matches!(c, '\u{01}'..='\u{08}' | '\u{0b}' | '\u{0c}' | '\u{0e}'..='\u{1f}' | '\u{7f}')
}

fn is_ctext(c: char) -> bool {
    matches!(c, '\u{21}'..='\u{27}' | '\u{2a}'..='\u{5b}' | '\u{5d}'..='\u{7e}')
        || is_obs_no_ws_ctl(c)
        || is_utf8_non_ascii(c)
}

fn is_dtext(c: char) -> bool {
    matches!(c, '\u{21}'..='\u{5a}' | '\u{5e}'..='\u{7e}')
        || is_obs_no_ws_ctl(c)
        || is_utf8_non_ascii(c)
}

fn is_qtext(c: char) -> bool {
    matches!(c, '\u{21}' | '\u{23}'..='\u{5b}' | '\u{5d}'..='\u{7e}')
        || is_obs_no_ws_ctl(c)
        || is_utf8_non_ascii(c)
}

fn is_tspecial(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']' | '?' | '='
    )
}

fn is_mime_token(c: char) -> bool {
    let u = c as u32;
    u > 32 && u < 127 && !is_tspecial(c)
}

fn is_attribute_char(c: char) -> bool {
    is_mime_token(c) && c != '*' && c != '\'' && c != '%'
}

fn is_charset_char(c: char) -> bool {
    is_mime_token(c) && c != '?' && c != '*'
}

fn is_unstructured_char(c: char) -> bool {
    is_vchar(c) || is_obs_no_ws_ctl(c)
}

// Whitespace and comments

fn wsp(input: Span) -> IResult<Span, Span> {
    take_while1(|c| c == ' ' || c == '\t').parse(input)
}

// the raw value may use either canonical CRLF or a bare LF
fn newline(input: Span) -> IResult<Span, Span> {
    recognize(preceded(opt(char('\r')), char('\n'))).parse(input)
}

fn fws(input: Span) -> IResult<Span, Span> {
    context(
        "fws",
        alt((
            recognize((opt((many0(wsp), newline)), many1(wsp))),
            obs_fws,
        )),
    )
    .parse(input)
}

fn obs_fws(input: Span) -> IResult<Span, Span> {
    recognize(many1((opt(newline), wsp))).parse(input)
}

fn cfws(input: Span) -> IResult<Span, Span> {
    context(
        "cfws",
        alt((recognize((many1((opt(fws), comment)), opt(fws))), fws)),
    )
    .parse(input)
}

fn comment(input: Span) -> IResult<Span, Span> {
    context(
        "comment",
        recognize(delimited(
            char('('),
            many0((opt(fws), ccontent)),
            (opt(fws), char(')')),
        )),
    )
    .parse(input)
}

fn ccontent(input: Span) -> IResult<Span, Span> {
    context(
        "ccontent",
        alt((take_while1(is_ctext), recognize(quoted_pair), comment)),
    )
    .parse(input)
}

fn quoted_pair(input: Span) -> IResult<Span, char> {
    context(
        "quoted_pair",
        preceded(char('\\'), satisfy(|c| is_vchar(c) || c == ' ' || c == '\t')),
    )
    .parse(input)
}

// Atoms, quoted strings, words

fn atext(input: Span) -> IResult<Span, Span> {
    take_while1(is_atext).parse(input)
}

fn atom(input: Span) -> IResult<Span, String> {
    context(
        "atom",
        map(delimited(opt(cfws), atext, opt(cfws)), |s: Span| {
            s.fragment().to_string()
        }),
    )
    .parse(input)
}

fn qcontent(input: Span) -> IResult<Span, String> {
    context(
        "qcontent",
        alt((
            map(take_while1(is_qtext), |s: Span| s.fragment().to_string()),
            map(quoted_pair, |c| c.to_string()),
        )),
    )
    .parse(input)
}

fn quoted_string(input: Span) -> IResult<Span, String> {
    context(
        "quoted_string",
        delimited(
            opt(cfws),
            delimited(
                char('"'),
                fold_many0(
                    (opt(fws), qcontent),
                    String::new,
                    |mut acc: String, (folded, qc)| {
                        if folded.is_some() {
                            acc.push(' ');
                        }
                        acc.push_str(&qc);
                        acc
                    },
                ),
                (opt(fws), char('"')),
            ),
            opt(cfws),
        ),
    )
    .parse(input)
}

fn word(input: Span) -> IResult<Span, String> {
    context("word", alt((atom, quoted_string))).parse(input)
}

// RFC 2047 encoded words

fn encoded_word(input: Span) -> IResult<Span, String> {
    let (loc, (charset, _language, encoding, text)) = delimited(
        tag("=?"),
        (
            take_while1(is_charset_char),
            opt(preceded(char('*'), take_while1(is_charset_char))),
            delimited(char('?'), satisfy(|c| c.is_ascii_alphanumeric()), char('?')),
            take_while1(|c| is_vchar(c) && c != '?'),
        ),
        tag("?="),
    )
    .parse(input)?;

    let bytes = match encoding {
        'B' | 'b' => data_encoding::BASE64_MIME
            .decode(text.fragment().as_bytes())
            .map_err(|err| make_context_error(input, format!("base64 decode: {err}")))?,
        'Q' | 'q' => quoted_printable::decode(
            text.fragment().replace('_', " "),
            quoted_printable::ParseMode::Robust,
        )
        .map_err(|err| make_context_error(input, format!("quoted printable decode: {err}")))?,
        enc => {
            return Err(make_context_error(
                input,
                format!("invalid encoded word encoding '{enc}'"),
            ))
        }
    };

    let charset = Charset::for_label_no_replacement(charset.fragment().as_bytes()).ok_or_else(
        || make_context_error(input, format!("unsupported charset '{}'", charset.fragment())),
    )?;

    let (decoded, _malformed) = charset.decode_without_bom_handling(&bytes);
    Ok((loc, decoded.to_string()))
}

// Phrases (display names, keywords)

enum PhraseWord {
    Encoded(String),
    Text(String),
}

fn phrase_word(input: Span) -> IResult<Span, PhraseWord> {
    alt((
        map(
            delimited(opt(cfws), encoded_word, opt(cfws)),
            PhraseWord::Encoded,
        ),
        map(quoted_string, PhraseWord::Text),
        // obs-phrase embeds periods, so "John Q. Public" holds together
        map(
            delimited(
                opt(cfws),
                take_while1(|c| is_atext(c) || c == '.'),
                opt(cfws),
            ),
            |s: Span| PhraseWord::Text(s.fragment().to_string()),
        ),
    ))
    .parse(input)
}

fn phrase(input: Span) -> IResult<Span, String> {
    context(
        "phrase",
        map(many1(phrase_word), |words| {
            let mut result = String::new();
            let mut prev_encoded = false;
            for w in words {
                match w {
                    PhraseWord::Encoded(s) => {
                        // space between adjacent encoded words is elided
                        if !result.is_empty() && !prev_encoded {
                            result.push(' ');
                        }
                        result.push_str(&s);
                        prev_encoded = true;
                    }
                    PhraseWord::Text(s) => {
                        if !result.is_empty() {
                            result.push(' ');
                        }
                        result.push_str(&s);
                        prev_encoded = false;
                    }
                }
            }
            result
        }),
    )
    .parse(input)
}

// Unstructured header values (Subject and friends)

enum ProcessedWord<'a> {
    Fws,
    Encoded(String),
    Text(&'a str),
}

fn unstructured(input: Span) -> IResult<Span, String> {
    let (loc, words) = many0(alt((
        map(fws, |_| ProcessedWord::Fws),
        map(encoded_word, ProcessedWord::Encoded),
        map(take_while1(is_unstructured_char), |s: Span| {
            ProcessedWord::Text(s.fragment())
        }),
    )))
    .parse(input)?;

    let mut result = String::new();
    let mut pending_space = false;
    let mut prev_encoded = false;
    for word in words {
        match word {
            ProcessedWord::Fws => {
                pending_space = true;
            }
            ProcessedWord::Encoded(s) => {
                if pending_space && !prev_encoded && !result.is_empty() {
                    result.push(' ');
                }
                result.push_str(&s);
                pending_space = false;
                prev_encoded = true;
            }
            ProcessedWord::Text(t) => {
                if pending_space && !result.is_empty() {
                    result.push(' ');
                }
                result.push_str(t);
                pending_space = false;
                prev_encoded = false;
            }
        }
    }

    Ok((loc, result))
}

// Addresses

fn mailbox(input: Span) -> IResult<Span, Mailbox> {
    context(
        "mailbox",
        alt((
            name_addr,
            map(addr_spec, |address| Mailbox {
                name: None,
                address,
            }),
        )),
    )
    .parse(input)
}

fn name_addr(input: Span) -> IResult<Span, Mailbox> {
    context(
        "name_addr",
        map((opt(phrase), angle_addr), |(name, address)| Mailbox {
            name,
            address,
        }),
    )
    .parse(input)
}

fn angle_addr(input: Span) -> IResult<Span, AddrSpec> {
    context(
        "angle_addr",
        delimited(
            (opt(cfws), char('<')),
            preceded(opt(obs_route), addr_spec),
            (char('>'), opt(cfws)),
        ),
    )
    .parse(input)
}

fn obs_route(input: Span) -> IResult<Span, Span> {
    context("obs_route", recognize((obs_domain_list, char(':')))).parse(input)
}

fn obs_domain_list(input: Span) -> IResult<Span, Span> {
    recognize((
        many0(alt((recognize(cfws), recognize(char(','))))),
        char('@'),
        domain,
        many0((char(','), opt(cfws), opt(preceded(char('@'), domain)))),
    ))
    .parse(input)
}

fn addr_spec(input: Span) -> IResult<Span, AddrSpec> {
    context(
        "addr_spec",
        map(
            (local_part, opt(preceded(char('@'), domain))),
            |(local_part, domain)| AddrSpec { local_part, domain },
        ),
    )
    .parse(input)
}

fn local_part(input: Span) -> IResult<Span, String> {
    context("local_part", alt((obs_local_part, dot_atom, quoted_string))).parse(input)
}

fn obs_local_part(input: Span) -> IResult<Span, String> {
    context(
        "obs_local_part",
        map(
            verify(
                (word, many0(preceded(char('.'), word))),
                |(_, rest): &(String, Vec<String>)| !rest.is_empty(),
            ),
            |(first, rest)| {
                let mut result = first;
                for piece in rest {
                    result.push('.');
                    result.push_str(&piece);
                }
                result
            },
        ),
    )
    .parse(input)
}

fn domain(input: Span) -> IResult<Span, String> {
    context("domain", alt((dot_atom, domain_literal, obs_domain))).parse(input)
}

fn obs_domain(input: Span) -> IResult<Span, String> {
    context(
        "obs_domain",
        map((atom, many0(preceded(char('.'), atom))), |(first, rest)| {
            let mut result = first;
            for piece in rest {
                result.push('.');
                result.push_str(&piece);
            }
            result
        }),
    )
    .parse(input)
}

fn domain_literal(input: Span) -> IResult<Span, String> {
    context(
        "domain_literal",
        map(
            delimited(
                (opt(cfws), char('[')),
                many0((opt(fws), take_while1(is_dtext))),
                (opt(fws), char(']'), opt(cfws)),
            ),
            |pieces| {
                let mut result = String::from("[");
                for (_, piece) in pieces {
                    result.push_str(piece.fragment());
                }
                result.push(']');
                result
            },
        ),
    )
    .parse(input)
}

fn dot_atom(input: Span) -> IResult<Span, String> {
    context(
        "dot_atom",
        map(delimited(opt(cfws), dot_atom_text, opt(cfws)), |s: Span| {
            s.fragment().to_string()
        }),
    )
    .parse(input)
}

fn dot_atom_text(input: Span) -> IResult<Span, Span> {
    context(
        "dot_atom_text",
        recognize((atext, many0(preceded(char('.'), atext)))),
    )
    .parse(input)
}

fn mailbox_list(input: Span) -> IResult<Span, MailboxList> {
    context(
        "mailbox_list",
        map(separated_list1(char(','), mailbox), MailboxList),
    )
    .parse(input)
}

fn address(input: Span) -> IResult<Span, Address> {
    context("address", alt((group, map(mailbox, Address::Mailbox)))).parse(input)
}

fn group(input: Span) -> IResult<Span, Address> {
    context(
        "group",
        map(
            (phrase, char(':'), opt(group_list), char(';'), opt(cfws)),
            |(name, _, entries, _, _)| Address::Group {
                name,
                entries: entries.unwrap_or_else(|| MailboxList(vec![])),
            },
        ),
    )
    .parse(input)
}

fn group_list(input: Span) -> IResult<Span, MailboxList> {
    context(
        "group_list",
        alt((mailbox_list, map(cfws, |_| MailboxList(vec![])))),
    )
    .parse(input)
}

fn address_list(input: Span) -> IResult<Span, AddressList> {
    context(
        "address_list",
        map(separated_list1(char(','), address), AddressList),
    )
    .parse(input)
}

// Message identifiers

fn msg_id(input: Span) -> IResult<Span, MessageID> {
    context(
        "msg_id",
        map(
            delimited(
                (opt(cfws), char('<')),
                (id_left, char('@'), id_right),
                (char('>'), opt(cfws)),
            ),
            |(left, _, right)| MessageID(format!("{left}@{right}")),
        ),
    )
    .parse(input)
}

/// Content-ID values are like msg-id but the domain portion is often
/// omitted by generators, so it is optional here
fn content_id(input: Span) -> IResult<Span, MessageID> {
    context(
        "content_id",
        map(
            delimited(
                (opt(cfws), char('<')),
                (id_left, opt(preceded(char('@'), id_right))),
                (char('>'), opt(cfws)),
            ),
            |(left, right)| match right {
                Some(right) => MessageID(format!("{left}@{right}")),
                None => MessageID(left),
            },
        ),
    )
    .parse(input)
}

fn msg_id_list(input: Span) -> IResult<Span, Vec<MessageID>> {
    context("msg_id_list", many1(msg_id)).parse(input)
}

fn id_left(input: Span) -> IResult<Span, String> {
    context(
        "id_left",
        alt((
            map(dot_atom_text, |s: Span| s.fragment().to_string()),
            local_part,
        )),
    )
    .parse(input)
}

fn id_right(input: Span) -> IResult<Span, String> {
    context(
        "id_right",
        alt((
            map(dot_atom_text, |s: Span| s.fragment().to_string()),
            no_fold_literal,
            domain,
        )),
    )
    .parse(input)
}

fn no_fold_literal(input: Span) -> IResult<Span, String> {
    context(
        "no_fold_literal",
        map(
            recognize((char('['), take_while(is_dtext), char(']'))),
            |s: Span| s.fragment().to_string(),
        ),
    )
    .parse(input)
}

// Keywords

fn keywords(input: Span) -> IResult<Span, Vec<String>> {
    context(
        "keywords",
        terminated(
            separated_list1(char(','), phrase),
            opt((char(','), opt(cfws))),
        ),
    )
    .parse(input)
}

// Content-Type and friends

fn mime_token(input: Span) -> IResult<Span, Span> {
    take_while1(is_mime_token).parse(input)
}

fn content_type(input: Span) -> IResult<Span, MimeParameters> {
    let (loc, (mtype, _, subtype)) =
        delimited(opt(cfws), (mime_token, char('/'), mime_token), opt(cfws)).parse(input)?;
    let (loc, parameters) = parameter_list(loc)?;
    Ok((
        loc,
        MimeParameters {
            value: format!("{}/{}", mtype.fragment(), subtype.fragment()),
            parameters,
        },
    ))
}

fn token_with_parameters(input: Span) -> IResult<Span, MimeParameters> {
    let (loc, token) = delimited(opt(cfws), mime_token, opt(cfws)).parse(input)?;
    let (loc, parameters) = parameter_list(loc)?;
    Ok((
        loc,
        MimeParameters {
            value: token.fragment().to_string(),
            parameters,
        },
    ))
}

fn parameter_list(input: Span) -> IResult<Span, Vec<MimeParameter>> {
    map(
        (
            many0(preceded(char(';'), parameter)),
            opt(char(';')),
            opt(cfws),
        ),
        |(params, _, _)| params,
    )
    .parse(input)
}

fn parameter(input: Span) -> IResult<Span, MimeParameter> {
    context(
        "parameter",
        preceded(opt(cfws), alt((extended_parameter, regular_parameter))),
    )
    .parse(input)
}

fn attribute(input: Span) -> IResult<Span, String> {
    map(take_while1(is_attribute_char), |s: Span| {
        s.fragment().to_string()
    })
    .parse(input)
}

fn section(input: Span) -> IResult<Span, u32> {
    map_res(preceded(char('*'), digit1), |d: Span| {
        d.fragment().parse::<u32>()
    })
    .parse(input)
}

fn regular_parameter(input: Span) -> IResult<Span, MimeParameter> {
    map(
        (attribute, opt(section), preceded(char('='), value)),
        |(name, section, value)| MimeParameter {
            name,
            section,
            uses_encoding: false,
            mime_charset: None,
            mime_language: None,
            value,
        },
    )
    .parse(input)
}

fn extended_parameter(input: Span) -> IResult<Span, MimeParameter> {
    alt((extended_initial_parameter, extended_other_parameter)).parse(input)
}

// name[*0]*=charset'language'percent-encoded
fn extended_initial_parameter(input: Span) -> IResult<Span, MimeParameter> {
    map(
        (
            attribute,
            opt(verify(section, |n| *n == 0)),
            tag("*="),
            opt(map(take_while1(is_attribute_char), |s: Span| {
                s.fragment().to_string()
            })),
            char('\''),
            opt(map(take_while1(is_attribute_char), |s: Span| {
                s.fragment().to_string()
            })),
            char('\''),
            extended_value,
        ),
        |(name, section, _, mime_charset, _, mime_language, _, value)| MimeParameter {
            name,
            section,
            uses_encoding: true,
            mime_charset,
            mime_language,
            value,
        },
    )
    .parse(input)
}

// name*N*=percent-encoded continuation sections
fn extended_other_parameter(input: Span) -> IResult<Span, MimeParameter> {
    map(
        (attribute, section, tag("*="), extended_value),
        |(name, section, _, value)| MimeParameter {
            name,
            section: Some(section),
            uses_encoding: true,
            mime_charset: None,
            mime_language: None,
            value,
        },
    )
    .parse(input)
}

fn extended_value(input: Span) -> IResult<Span, String> {
    map(
        take_while(|c| is_attribute_char(c) || c == '%'),
        |s: Span| s.fragment().to_string(),
    )
    .parse(input)
}

fn value(input: Span) -> IResult<Span, String> {
    alt((
        quoted_string,
        map(mime_token, |s: Span| s.fragment().to_string()),
    ))
    .parse(input)
}

// Typed values

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrSpec {
    pub local_part: String,
    /// absent for bare local parts like `To: mikel`
    pub domain: Option<String>,
}

impl AddrSpec {
    pub fn new(local_part: &str, domain: &str) -> Self {
        Self {
            local_part: local_part.to_string(),
            domain: Some(domain.to_string()),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        parse_with(text, addr_spec)
    }

    /// The plain address string, display name and quoting stripped
    pub fn address(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{}@{domain}", self.local_part),
            None => self.local_part.clone(),
        }
    }
}

impl EncodeHeaderValue for AddrSpec {
    fn encode_value(&self) -> SharedString<'static> {
        let local = if self.local_part.chars().all(|c| is_atext(c) || c == '.') {
            self.local_part.clone()
        } else {
            quote_string(&self.local_part)
        };
        match &self.domain {
            Some(domain) => format!("{local}@{domain}").into(),
            None => local.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: AddrSpec,
}

impl EncodeHeaderValue for Mailbox {
    fn encode_value(&self) -> SharedString<'static> {
        match &self.name {
            Some(name) => {
                let rendered_name = if !name.is_ascii() {
                    qp_encode(name)
                } else if name.chars().all(|c| is_atext(c) || c == ' ' || c == '.') {
                    name.to_string()
                } else {
                    quote_string(name)
                };
                format!("{rendered_name} <{}>", self.address.address()).into()
            }
            None => match &self.address.domain {
                Some(_) => format!("<{}>", self.address.address()).into(),
                None => self.address.encode_value(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxList(pub Vec<Mailbox>);

impl MailboxList {
    /// Ordered bare address strings, display names stripped
    pub fn addresses(&self) -> Vec<String> {
        self.0.iter().map(|mbox| mbox.address.address()).collect()
    }
}

impl EncodeHeaderValue for MailboxList {
    fn encode_value(&self) -> SharedString<'static> {
        let entries: Vec<String> = self
            .0
            .iter()
            .map(|mbox| mbox.encode_value().to_string())
            .collect();
        entries.join(",\r\n\t").into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Mailbox(Mailbox),
    Group { name: String, entries: MailboxList },
}

impl EncodeHeaderValue for Address {
    fn encode_value(&self) -> SharedString<'static> {
        match self {
            Self::Mailbox(mbox) => mbox.encode_value(),
            Self::Group { name, entries } => {
                let entries: Vec<String> = entries
                    .0
                    .iter()
                    .map(|mbox| mbox.encode_value().to_string())
                    .collect();
                format!("{name}: {};", entries.join(", ")).into()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressList(pub Vec<Address>);

impl AddressList {
    /// Ordered bare address strings; group members are flattened into
    /// the sequence in place
    pub fn addresses(&self) -> Vec<String> {
        let mut result = vec![];
        for entry in &self.0 {
            match entry {
                Address::Mailbox(mbox) => result.push(mbox.address.address()),
                Address::Group { entries, .. } => result.extend(entries.addresses()),
            }
        }
        result
    }
}

impl EncodeHeaderValue for AddressList {
    fn encode_value(&self) -> SharedString<'static> {
        let entries: Vec<String> = self
            .0
            .iter()
            .map(|address| address.encode_value().to_string())
            .collect();
        entries.join(",\r\n\t").into()
    }
}

/// Stored without the angle brackets; they are restored on encode
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageID(pub String);

impl EncodeHeaderValue for MessageID {
    fn encode_value(&self) -> SharedString<'static> {
        format!("<{}>", self.0).into()
    }
}

impl EncodeHeaderValue for Vec<MessageID> {
    fn encode_value(&self) -> SharedString<'static> {
        let entries: Vec<String> = self.iter().map(|id| format!("<{}>", id.0)).collect();
        entries.join("\r\n\t").into()
    }
}

impl EncodeHeaderValue for DateTime<FixedOffset> {
    fn encode_value(&self) -> SharedString<'static> {
        self.to_rfc2822().into()
    }
}

impl EncodeHeaderValue for Vec<String> {
    fn encode_value(&self) -> SharedString<'static> {
        let entries: Vec<String> = self
            .iter()
            .map(|keyword| {
                if !keyword.is_empty()
                    && keyword.chars().all(|c| is_atext(c) || c == ' ' || c == '.')
                {
                    keyword.clone()
                } else {
                    quote_string(keyword)
                }
            })
            .collect();
        entries.join(", ").into()
    }
}

/// A Received header value: free-form routing info, optionally
/// terminated by `; date-time`
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub info: String,
    pub date: Option<DateTime<FixedOffset>>,
}

impl Received {
    pub(crate) fn from_header_value(value: &str) -> Self {
        let unfolded = value.split_whitespace().collect::<Vec<_>>().join(" ");
        if let Some((info, date_text)) = unfolded.rsplit_once(';') {
            if let Ok(date) = DateTime::parse_from_rfc2822(date_text.trim()) {
                return Self {
                    info: info.trim().to_string(),
                    date: Some(date),
                };
            }
        }
        Self {
            info: unfolded.trim().to_string(),
            date: None,
        }
    }
}

impl EncodeHeaderValue for Received {
    fn encode_value(&self) -> SharedString<'static> {
        match &self.date {
            Some(date) => format!("{};\r\n\t{}", self.info, date.to_rfc2822()).into(),
            None => self.info.clone().into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct MimeParameter {
    name: String,
    section: Option<u32>,
    uses_encoding: bool,
    mime_charset: Option<String>,
    mime_language: Option<String>,
    value: String,
}

/// A structured Content-Type / Content-Disposition /
/// Content-Transfer-Encoding value: the leading token(s) plus an
/// ordered parameter list with RFC 2231 sections resolved on access.
#[derive(Debug, Clone, PartialEq)]
pub struct MimeParameters {
    pub value: String,
    parameters: Vec<MimeParameter>,
}

impl MimeParameters {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
            parameters: vec![],
        }
    }

    /// Resolve the value of the named parameter, reassembling RFC 2231
    /// continuation sections and decoding their charset
    pub fn get(&self, name: &str) -> Option<String> {
        let mut elements: Vec<&MimeParameter> = self
            .parameters
            .iter()
            .filter(|p| p.name.eq_ignore_ascii_case(name))
            .collect();
        if elements.is_empty() {
            return None;
        }
        elements.sort_by_key(|p| p.section.unwrap_or(0));

        let mut charset = None;
        let mut bytes: Vec<u8> = vec![];
        for element in elements {
            if element.mime_charset.is_some() {
                charset = element.mime_charset.as_deref();
            }
            if element.uses_encoding {
                percent_decode(&element.value, &mut bytes);
            } else {
                bytes.extend_from_slice(element.value.as_bytes());
            }
        }

        match charset {
            None => Some(String::from_utf8_lossy(&bytes).to_string()),
            Some(label) => {
                let charset = Charset::for_label_no_replacement(label.as_bytes())?;
                let (decoded, _malformed) = charset.decode_without_bom_handling(&bytes);
                Some(decoded.to_string())
            }
        }
    }

    /// Set the named parameter to a decoded value, replacing any prior
    /// sections. Encoding choices are made when the header is rendered.
    pub fn set(&mut self, name: &str, value: &str) {
        self.parameters
            .retain(|p| !p.name.eq_ignore_ascii_case(name));
        self.parameters.push(MimeParameter {
            name: name.to_string(),
            section: None,
            uses_encoding: false,
            mime_charset: None,
            mime_language: None,
            value: value.to_string(),
        });
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let value = self.get(name);
        self.parameters
            .retain(|p| !p.name.eq_ignore_ascii_case(name));
        value
    }

    /// Parameter names in their first-seen order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = vec![];
        for p in &self.parameters {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&p.name)) {
                names.push(p.name.to_string());
            }
        }
        names
    }

    /// (name, resolved value) pairs in first-seen order
    pub fn parameter_map(&self) -> Vec<(String, String)> {
        self.names()
            .into_iter()
            .filter_map(|name| self.get(&name).map(|value| (name, value)))
            .collect()
    }

    pub fn is_multipart(&self) -> bool {
        let v = self.value.to_ascii_lowercase();
        v.starts_with("multipart/") || v.starts_with("message/")
    }

    pub fn is_text(&self) -> bool {
        self.value.to_ascii_lowercase().starts_with("text/")
    }

    /// The portion of the value before the `/`, eg: `text` for `text/plain`
    pub fn main_type(&self) -> &str {
        self.value
            .split_once('/')
            .map(|(main, _)| main)
            .unwrap_or(&self.value)
    }

    /// The portion of the value after the `/`, if any
    pub fn sub_type(&self) -> Option<&str> {
        self.value.split_once('/').map(|(_, sub)| sub)
    }
}

fn percent_decode(value: &str, target: &mut Vec<u8>) {
    let bytes = value.as_bytes();
    let hex = |b: u8| (b as char).to_digit(16).map(|v| v as u8);
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                target.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        target.push(bytes[i]);
        i += 1;
    }
}

const MIME_PARAM_WIDTH: usize = 74;
const HEX_CHARS: &[u8] = b"0123456789ABCDEF";

impl EncodeHeaderValue for MimeParameters {
    fn encode_value(&self) -> SharedString<'static> {
        let mut result = self.value.to_string();

        for (name, value) in self.parameter_map() {
            for piece in encode_parameter(&name, &value) {
                result.push_str(";\r\n\t");
                result.push_str(&piece);
            }
        }

        result.into()
    }
}

/// Render one parameter as one or more `name[*N][*]=value` pieces,
/// each within the folding width. ASCII values use quoted strings,
/// non-ASCII values use RFC 2231 extended encoding.
fn encode_parameter(name: &str, value: &str) -> Vec<String> {
    if value.is_ascii() && !value.contains(|c: char| c.is_ascii_control()) {
        let quoted = quote_string(value);
        let one_line = format!("{name}={quoted}");
        if one_line.len() <= MIME_PARAM_WIDTH {
            return vec![one_line];
        }

        // continuation sections, each a complete quoted string;
        // quoted_len tracks the escaped width, the chunk holds the
        // raw text so quote_string escapes it exactly once
        let mut pieces = vec![];
        let mut chunk = String::new();
        let mut quoted_len = 0;
        let mut section = 0;
        // name*NN="" overhead plus room for one escaped char
        let budget = MIME_PARAM_WIDTH.saturating_sub(name.len() + 8).max(2);
        for c in value.chars() {
            let w = if c == '"' || c == '\\' { 2 } else { 1 };
            if quoted_len + w > budget {
                pieces.push(format!("{name}*{section}={}", quote_string(&chunk)));
                section += 1;
                chunk.clear();
                quoted_len = 0;
            }
            chunk.push(c);
            quoted_len += w;
        }
        if !chunk.is_empty() || pieces.is_empty() {
            pieces.push(format!("{name}*{section}={}", quote_string(&chunk)));
        }
        return pieces;
    }

    // percent encode everything that isn't a bare attribute char
    let mut encoded = String::new();
    for b in value.bytes() {
        if b.is_ascii() && is_attribute_char(b as char) {
            encoded.push(b as char);
        } else {
            encoded.push('%');
            encoded.push(HEX_CHARS[(b >> 4) as usize] as char);
            encoded.push(HEX_CHARS[(b & 0xf) as usize] as char);
        }
    }

    let single = format!("{name}*=UTF-8''{encoded}");
    if single.len() <= MIME_PARAM_WIDTH {
        return vec![single];
    }

    let mut pieces: Vec<String> = vec![];
    let mut chunk = String::from("UTF-8''");
    let budget = MIME_PARAM_WIDTH.saturating_sub(name.len() + 6).max(3);
    let bytes = encoded.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let step = if bytes[i] == b'%' { 3 } else { 1 };
        if chunk.len() + step > budget {
            pieces.push(format!("{name}*{}*={chunk}", pieces.len()));
            chunk = String::new();
        }
        chunk.push_str(&encoded[i..i + step]);
        i += step;
    }
    if !chunk.is_empty() {
        pieces.push(format!("{name}*{}*={chunk}", pieces.len()));
    }
    pieces
}

pub(crate) fn quote_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 2);
    result.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            result.push('\\');
        }
        result.push(c);
    }
    result.push('"');
    result
}

/// RFC 2047 encode a string as one or more quoted-printable encoded
/// words, folding onto continuation lines as needed
pub(crate) fn qp_encode(s: &str) -> String {
    const LINE_LENGTH: usize = 74;
    const PREFIX: &str = "=?UTF-8?q?";
    const SUFFIX: &str = "?=";
    let limit = LINE_LENGTH - (PREFIX.len() + SUFFIX.len());

    let mut result = String::with_capacity(s.len() + PREFIX.len() + SUFFIX.len());
    result.push_str(PREFIX);
    let mut line_length = 0;

    for c in s.bytes() {
        let width = match c {
            b' ' => 1,
            c if c.is_ascii_alphanumeric()
                || (c.is_ascii_punctuation() && c != b'=' && c != b'?' && c != b'_') =>
            {
                1
            }
            _ => 3,
        };

        if line_length + width > limit {
            result.push_str("?=\r\n\t=?UTF-8?q?");
            line_length = 0;
        }

        match c {
            b' ' => result.push('_'),
            c if c.is_ascii_alphanumeric()
                || (c.is_ascii_punctuation() && c != b'=' && c != b'?' && c != b'_') =>
            {
                result.push(c as char)
            }
            c => {
                result.push('=');
                result.push(HEX_CHARS[(c >> 4) as usize] as char);
                result.push(HEX_CHARS[(c & 0xf) as usize] as char);
            }
        }
        line_length += width;
    }

    result.push_str(SUFFIX);
    result
}
