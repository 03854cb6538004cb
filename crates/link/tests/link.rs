//! End-to-end linking of synthetic relocatable objects against synthetic stub templates.

use elfpress_elf::{
    Arch, Image, R_386_32, R_386_PC32, R_X86_64_64, R_X86_64_PC32, SHN_COMMON, SHT_NOBITS,
    SHT_PROGBITS, SHT_REL, SHT_RELA, SHT_STRTAB, SHT_SYMTAB,
};
use elfpress_link::{import_hash, link, ArchSpec, Error, LinkOptions, BASE, LOAD_BIAS, SIGNATURE};
use elfpress_pack::prelude::*;

/// Length of the synthetic stub suffix, and therefore the payload offset of the jump table.
const SUFFIX_LEN: usize = 16;

/// Builds a stub template: a filler prefix with distinctive metadata bytes, the signature, and a
/// suffix whose last word is the to-be-patched tail jump.
fn stub(prefix_len: usize) -> Vec<u8> {
    let mut blob = vec![0x90u8; prefix_len];
    let len = blob.len();
    blob[len - 8..].copy_from_slice(&[0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8]);
    blob.extend_from_slice(SIGNATURE);
    blob.extend_from_slice(&[0x90; SUFFIX_LEN - 4]);
    blob.extend_from_slice(&[0; 4]);
    blob
}

fn stub32() -> Vec<u8> {
    stub(0xE0)
}

fn stub64() -> Vec<u8> {
    stub(0x170)
}

/// Options that skip the parameter search: fixed two-context parameters and strict round-trip
/// verification.
fn fixed_options() -> LinkOptions {
    LinkOptions {
        params: "0208010103".parse().unwrap(),
        search: SearchConfig { generations: 0, seed: 1 },
        strict: true,
    }
}

#[derive(Clone, Copy)]
enum Place {
    Section(usize),
    Undefined,
    Common,
}

struct Sym {
    name: &'static str,
    place: Place,
    value: u64,
    size: u64,
    info: u8,
}

struct Rel {
    target: usize,
    offset: u64,
    symbol: u32,
    kind: u32,
    addend: i64,
}

/// Assembles a minimal relocatable object: user sections, a symbol table, and one relocation
/// section per relocated user section.
struct Obj {
    is64: bool,
    sections: Vec<(String, u32, Vec<u8>, u64)>,
    symbols: Vec<Sym>,
    relocs: Vec<Rel>,
}

impl Obj {
    fn new(is64: bool) -> Self {
        Self { is64, sections: Vec::new(), symbols: Vec::new(), relocs: Vec::new() }
    }

    fn section(&mut self, name: &str, kind: u32, data: Vec<u8>) -> usize {
        self.sections.push((name.to_string(), kind, data, 0));
        self.sections.len() - 1
    }

    fn nobits(&mut self, name: &str, size: u64) -> usize {
        self.sections.push((name.to_string(), SHT_NOBITS, Vec::new(), size));
        self.sections.len() - 1
    }

    /// Adds a symbol and returns its symbol-table index.
    fn symbol(&mut self, name: &'static str, place: Place, value: u64, size: u64, info: u8) -> u32 {
        self.symbols.push(Sym { name, place, value, size, info });
        self.symbols.len() as u32
    }

    fn reloc(&mut self, target: usize, offset: u64, symbol: u32, kind: u32, addend: i64) {
        self.relocs.push(Rel { target, offset, symbol, kind, addend });
    }

    fn build(&self) -> Vec<u8> {
        let nuser = self.sections.len();
        let mut rel_targets: Vec<usize> = Vec::new();
        for rel in &self.relocs {
            if !rel_targets.contains(&rel.target) {
                rel_targets.push(rel.target);
            }
        }
        let nrel = rel_targets.len();
        let symtab_index = 1 + nuser + nrel;
        let strtab_index = symtab_index + 1;
        let shstrtab_index = strtab_index + 1;
        let shnum = shstrtab_index + 1;

        // Symbol string table.
        let mut strtab = vec![0u8];
        let mut sym_names = Vec::new();
        for sym in &self.symbols {
            sym_names.push(strtab.len() as u32);
            strtab.extend_from_slice(sym.name.as_bytes());
            strtab.push(0);
        }

        let sym_entry = if self.is64 { 24 } else { 16 };
        let mut symtab = vec![0u8; sym_entry];
        for (sym, &name_offset) in self.symbols.iter().zip(&sym_names) {
            let shndx: u16 = match sym.place {
                Place::Section(index) => (1 + index) as u16,
                Place::Undefined => 0,
                Place::Common => SHN_COMMON,
            };
            symtab.extend_from_slice(&name_offset.to_le_bytes());
            if self.is64 {
                symtab.push(sym.info);
                symtab.push(0);
                symtab.extend_from_slice(&shndx.to_le_bytes());
                symtab.extend_from_slice(&sym.value.to_le_bytes());
                symtab.extend_from_slice(&sym.size.to_le_bytes());
            } else {
                symtab.extend_from_slice(&(sym.value as u32).to_le_bytes());
                symtab.extend_from_slice(&(sym.size as u32).to_le_bytes());
                symtab.push(sym.info);
                symtab.push(0);
                symtab.extend_from_slice(&shndx.to_le_bytes());
            }
        }

        // One relocation section per relocated target, entries in insertion order.
        let mut rel_datas = Vec::new();
        for &target in &rel_targets {
            let mut data = Vec::new();
            for rel in self.relocs.iter().filter(|rel| rel.target == target) {
                if self.is64 {
                    data.extend_from_slice(&rel.offset.to_le_bytes());
                    let info = (u64::from(rel.symbol) << 32) | u64::from(rel.kind);
                    data.extend_from_slice(&info.to_le_bytes());
                    data.extend_from_slice(&rel.addend.to_le_bytes());
                } else {
                    data.extend_from_slice(&(rel.offset as u32).to_le_bytes());
                    let info = (rel.symbol << 8) | rel.kind;
                    data.extend_from_slice(&info.to_le_bytes());
                }
            }
            rel_datas.push(data);
        }

        // Section name table.
        let mut shstrtab = vec![0u8];
        let mut name_at = |table: &mut Vec<u8>, name: &str| {
            let at = table.len() as u32;
            table.extend_from_slice(name.as_bytes());
            table.push(0);
            at
        };
        let user_names: Vec<u32> =
            self.sections.iter().map(|(name, ..)| name_at(&mut shstrtab, name)).collect();
        let rel_prefix = if self.is64 { ".rela" } else { ".rel" };
        let rel_names: Vec<u32> = rel_targets
            .iter()
            .map(|&target| {
                let name = format!("{rel_prefix}{}", self.sections[target].0);
                name_at(&mut shstrtab, &name)
            })
            .collect();
        let symtab_name = name_at(&mut shstrtab, ".symtab");
        let strtab_name = name_at(&mut shstrtab, ".strtab");
        let shstrtab_name = name_at(&mut shstrtab, ".shstrtab");

        let ehsize: usize = if self.is64 { 64 } else { 52 };
        let shentsize: usize = if self.is64 { 64 } else { 40 };

        // Data blobs land after the ELF header, section headers after the data.
        struct Shdr {
            name: u32,
            kind: u32,
            offset: usize,
            size: usize,
            link: u32,
            entsize: usize,
        }
        let mut headers = vec![Shdr { name: 0, kind: 0, offset: 0, size: 0, link: 0, entsize: 0 }];
        let mut body: Vec<u8> = Vec::new();
        let mut push_blob = |body: &mut Vec<u8>, data: &[u8]| {
            let offset = ehsize + body.len();
            body.extend_from_slice(data);
            offset
        };

        for (index, (_, kind, data, nobits_size)) in self.sections.iter().enumerate() {
            let offset = push_blob(&mut body, data);
            let size = if *kind == SHT_NOBITS { *nobits_size as usize } else { data.len() };
            headers.push(Shdr {
                name: user_names[index],
                kind: *kind,
                offset,
                size,
                link: 0,
                entsize: 0,
            });
        }
        let rel_kind = if self.is64 { SHT_RELA } else { SHT_REL };
        let rel_entsize: usize = if self.is64 { 24 } else { 8 };
        for (index, data) in rel_datas.iter().enumerate() {
            let offset = push_blob(&mut body, data);
            headers.push(Shdr {
                name: rel_names[index],
                kind: rel_kind,
                offset,
                size: data.len(),
                link: symtab_index as u32,
                entsize: rel_entsize,
            });
        }
        let offset = push_blob(&mut body, &symtab);
        headers.push(Shdr {
            name: symtab_name,
            kind: SHT_SYMTAB,
            offset,
            size: symtab.len(),
            link: strtab_index as u32,
            entsize: sym_entry,
        });
        let offset = push_blob(&mut body, &strtab);
        headers.push(Shdr {
            name: strtab_name,
            kind: SHT_STRTAB,
            offset,
            size: strtab.len(),
            link: 0,
            entsize: 0,
        });
        let offset = push_blob(&mut body, &shstrtab);
        headers.push(Shdr {
            name: shstrtab_name,
            kind: SHT_STRTAB,
            offset,
            size: shstrtab.len(),
            link: 0,
            entsize: 0,
        });
        assert_eq!(headers.len(), shnum);

        let shoff = ehsize + body.len();
        let mut obj = Vec::new();
        obj.extend_from_slice(&[0x7F, b'E', b'L', b'F']);
        obj.extend_from_slice(&[if self.is64 { 2 } else { 1 }, 1, 1, 0]);
        obj.extend_from_slice(&[0; 8]);
        obj.extend_from_slice(&1u16.to_le_bytes()); // ET_REL
        obj.extend_from_slice(&(if self.is64 { 62u16 } else { 3u16 }).to_le_bytes());
        obj.extend_from_slice(&1u32.to_le_bytes());
        if self.is64 {
            obj.extend_from_slice(&0u64.to_le_bytes()); // e_entry
            obj.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
            obj.extend_from_slice(&(shoff as u64).to_le_bytes());
        } else {
            obj.extend_from_slice(&0u32.to_le_bytes());
            obj.extend_from_slice(&0u32.to_le_bytes());
            obj.extend_from_slice(&(shoff as u32).to_le_bytes());
        }
        obj.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        obj.extend_from_slice(&(ehsize as u16).to_le_bytes());
        obj.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        obj.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        obj.extend_from_slice(&(shentsize as u16).to_le_bytes());
        obj.extend_from_slice(&(shnum as u16).to_le_bytes());
        obj.extend_from_slice(&(shstrtab_index as u16).to_le_bytes());
        assert_eq!(obj.len(), ehsize);

        obj.extend_from_slice(&body);
        for header in &headers {
            obj.extend_from_slice(&header.name.to_le_bytes());
            obj.extend_from_slice(&header.kind.to_le_bytes());
            if self.is64 {
                obj.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
                obj.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
                obj.extend_from_slice(&(header.offset as u64).to_le_bytes());
                obj.extend_from_slice(&(header.size as u64).to_le_bytes());
                obj.extend_from_slice(&header.link.to_le_bytes());
                obj.extend_from_slice(&0u32.to_le_bytes()); // sh_info
                obj.extend_from_slice(&0u64.to_le_bytes()); // sh_addralign
                obj.extend_from_slice(&(header.entsize as u64).to_le_bytes());
            } else {
                obj.extend_from_slice(&0u32.to_le_bytes());
                obj.extend_from_slice(&0u32.to_le_bytes());
                obj.extend_from_slice(&(header.offset as u32).to_le_bytes());
                obj.extend_from_slice(&(header.size as u32).to_le_bytes());
                obj.extend_from_slice(&header.link.to_le_bytes());
                obj.extend_from_slice(&0u32.to_le_bytes());
                obj.extend_from_slice(&0u32.to_le_bytes());
                obj.extend_from_slice(&(header.entsize as u32).to_le_bytes());
            }
        }
        obj
    }
}

const GLOBAL_FUNC: u8 = 0x12;
const GLOBAL_NOTYPE: u8 = 0x10;
const GLOBAL_OBJECT: u8 = 0x11;

fn word32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn word64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

#[test]
fn links_minimal_start_object() {
    let mut obj = Obj::new(false);
    let text = obj.section(".text", SHT_PROGBITS, vec![0xC3]);
    obj.symbol("_start", Place::Section(text), 0, 1, GLOBAL_FUNC);

    let image = Image::load(&obj.build()).unwrap();
    assert_eq!(image.arch(), Arch::I386);
    let out = link(&image, &stub32(), &fixed_options()).unwrap();

    // Payload: suffix, terminator slot, one text byte.
    assert_eq!(out.payload.len(), SUFFIX_LEN + 5 + 1);
    assert_eq!(&out.payload[SUFFIX_LEN..SUFFIX_LEN + 5], &[0; 5]);
    assert_eq!(out.payload[SUFFIX_LEN + 5], 0xC3);

    // The tail word jumps from the end of the suffix to _start behind the terminator slot.
    assert_eq!(word32(&out.payload, SUFFIX_LEN - 4), 5);

    // Final image: prefix (with the two words patched), metadata replay, stream, bit count,
    // parameter trailer.
    let template = stub32();
    assert_eq!(&out.image[..0x7C], &template[..0x7C]);
    assert_eq!(&out.image[0x80..0xD8], &template[0x80..0xD8]);
    assert_eq!(&out.image[0xDC..0xE0], &template[0xDC..0xE0]);
    assert_eq!(&out.image[0xE0..0xE8], &[0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8]);
    let count = out.params.context_count;
    assert_eq!(count, 2);
    let trailer = out.image.len() - 2 * count - 4;
    assert_eq!(word32(&out.image, trailer) as usize, out.payload.len() * 8);
    assert_eq!(&out.image[trailer + 4..trailer + 4 + count], &out.params.weights[..count]);
    assert_eq!(&out.image[trailer + 4 + count..], &out.params.contexts[..count]);

    // Patched words: compressed-data-end pointer and total file size.
    let spec = ArchSpec::for_arch(Arch::I386);
    let stream_len = trailer - 0xE8;
    assert_eq!(word32(&out.image, spec.code_end_patch), BASE + (0xE8 + stream_len) as u32 - 4);
    assert_eq!(word32(&out.image, spec.file_size_patch) as usize, out.image.len());
}

#[test]
fn single_import_gets_slot_zero() {
    let mut obj = Obj::new(false);
    // call puts at offset 3; the relocated displacement lives at offset 4.
    let text = obj.section(".text", SHT_PROGBITS, vec![0x90, 0x90, 0x90, 0xE8, 0, 0, 0, 0]);
    obj.symbol("_start", Place::Section(text), 0, 8, GLOBAL_FUNC);
    let puts = obj.symbol("puts", Place::Undefined, 0, 0, GLOBAL_NOTYPE);
    obj.reloc(text, 4, puts, R_386_PC32, 0);

    let image = Image::load(&obj.build()).unwrap();
    let out = link(&image, &stub32(), &fixed_options()).unwrap();

    // One 5-byte slot plus the zero terminator, then the text.
    let hash_off = SUFFIX_LEN;
    assert_eq!(out.payload[hash_off], 0xE9);
    assert_eq!(word32(&out.payload, hash_off + 1), import_hash("puts"));
    assert_eq!(&out.payload[hash_off + 5..hash_off + 10], &[0; 5]);
    let secoff = hash_off + 10;
    assert_eq!(out.payload.len(), secoff + 8);

    // PC32 against slot 0: hash_off - r_offset - secoff.
    let expected = (hash_off as u32).wrapping_sub(4).wrapping_sub(secoff as u32);
    assert_eq!(word32(&out.payload, secoff + 4), expected);
}

#[test]
fn data_relocation_includes_load_bias() {
    let mut obj = Obj::new(false);
    let text = obj.section(".text", SHT_PROGBITS, vec![0; 8]);
    let data = obj.section(".data", SHT_PROGBITS, vec![0x11; 12]);
    obj.symbol("_start", Place::Section(text), 0, 8, GLOBAL_FUNC);
    let value = obj.symbol("value", Place::Section(data), 4, 4, GLOBAL_OBJECT);
    obj.reloc(text, 0, value, R_386_32, 0);

    let image = Image::load(&obj.build()).unwrap();
    let out = link(&image, &stub32(), &fixed_options()).unwrap();

    // .text is placed first, .data directly after it.
    let text_off = SUFFIX_LEN + 5;
    let data_off = text_off + 8;
    assert_eq!(out.payload[data_off], 0x11);
    assert_eq!(
        word32(&out.payload, text_off),
        BASE + data_off as u32 + 4 + LOAD_BIAS
    );
}

#[test]
fn imports_rank_lexicographically() {
    let mut obj = Obj::new(true);
    let text = obj.section(".text", SHT_PROGBITS, vec![0; 16]);
    obj.symbol("_start", Place::Section(text), 0, 16, GLOBAL_FUNC);
    // Referenced foo-first; the import table is still ordered bar, foo.
    let foo = obj.symbol("foo", Place::Undefined, 0, 0, GLOBAL_NOTYPE);
    let bar = obj.symbol("bar", Place::Undefined, 0, 0, GLOBAL_NOTYPE);
    obj.reloc(text, 2, foo, R_X86_64_PC32, -4);
    obj.reloc(text, 10, bar, R_X86_64_PC32, -4);

    let image = Image::load(&obj.build()).unwrap();
    assert_eq!(image.arch(), Arch::X86_64);
    let out = link(&image, &stub64(), &fixed_options()).unwrap();

    let hash_off = SUFFIX_LEN;
    assert_eq!(&out.payload[hash_off..hash_off + 2], &[0xFF, 0x25]);
    assert_eq!(word64(&out.payload, hash_off + 6), u64::from(import_hash("bar")));
    assert_eq!(word64(&out.payload, hash_off + 14 + 6), u64::from(import_hash("foo")));
    assert_eq!(&out.payload[hash_off + 28..hash_off + 42], &[0; 14]);

    let secoff = hash_off + 3 * 14;
    // foo is slot 1: BASE + hash_off + 14 - offset - secoff - BASE + addend.
    let expected_foo =
        (hash_off as u32 + 14).wrapping_sub(2).wrapping_sub(secoff as u32).wrapping_sub(4);
    assert_eq!(word32(&out.payload, secoff + 2), expected_foo);
    let expected_bar =
        (hash_off as u32).wrapping_sub(10).wrapping_sub(secoff as u32).wrapping_sub(4);
    assert_eq!(word32(&out.payload, secoff + 10), expected_bar);
}

#[test]
fn absolute_relocation_on_x86_64_adds_addend() {
    let mut obj = Obj::new(true);
    let text = obj.section(".text", SHT_PROGBITS, vec![0; 16]);
    let data = obj.section(".data", SHT_PROGBITS, vec![0x22; 8]);
    obj.symbol("_start", Place::Section(text), 0, 16, GLOBAL_FUNC);
    let value = obj.symbol("value", Place::Section(data), 0, 8, GLOBAL_OBJECT);
    obj.reloc(text, 8, value, R_X86_64_64, 3);

    let image = Image::load(&obj.build()).unwrap();
    let out = link(&image, &stub64(), &fixed_options()).unwrap();

    let text_off = SUFFIX_LEN + 14;
    let data_off = text_off + 16;
    assert_eq!(
        word64(&out.payload, text_off + 8),
        u64::from(BASE + data_off as u32 + LOAD_BIAS) + 3
    );
}

#[test]
fn common_symbols_stack_after_bss() {
    let mut obj = Obj::new(false);
    let text = obj.section(".text", SHT_PROGBITS, vec![0; 8]);
    obj.nobits(".bss", 16);
    obj.symbol("_start", Place::Section(text), 0, 8, GLOBAL_FUNC);
    let scratch = obj.symbol("scratch", Place::Common, 4, 32, GLOBAL_OBJECT);
    obj.reloc(text, 0, scratch, R_386_32, 0);

    let image = Image::load(&obj.build()).unwrap();
    let out = link(&image, &stub32(), &fixed_options()).unwrap();

    // Payload body is well under 256 bytes, so commons begin at the first aligned boundary,
    // offset by the 16 bytes .bss occupies.
    let common_base = 256u32;
    assert!(out.payload.len() <= common_base as usize);
    assert_eq!(
        word32(&out.payload, SUFFIX_LEN + 5),
        BASE + common_base + 16 + LOAD_BIAS
    );
}

#[test]
fn rejects_object_without_start() {
    let mut obj = Obj::new(false);
    let text = obj.section(".text", SHT_PROGBITS, vec![0xC3]);
    obj.symbol("main", Place::Section(text), 0, 1, GLOBAL_FUNC);

    let image = Image::load(&obj.build()).unwrap();
    assert!(matches!(
        link(&image, &stub32(), &fixed_options()),
        Err(Error::NoEntrySymbol)
    ));
}

#[test]
fn rejects_wrong_relocation_flavor() {
    let mut obj = Obj::new(false);
    let text = obj.section(".text", SHT_PROGBITS, vec![0xC3]);
    // A 32-bit object carrying an explicit-addend table is not something the stub ABI covers.
    obj.section(".rela.text", SHT_RELA, vec![0; 12]);
    obj.symbol("_start", Place::Section(text), 0, 1, GLOBAL_FUNC);

    let image = Image::load(&obj.build()).unwrap();
    assert!(matches!(
        link(&image, &stub32(), &fixed_options()),
        Err(Error::WrongRelocationFlavor { .. })
    ));
}

#[test]
fn search_produces_a_self_consistent_image() {
    let mut obj = Obj::new(false);
    let body: Vec<u8> = (0..96u8).map(|i| i.wrapping_mul(3) % 7).collect();
    let text = obj.section(".text", SHT_PROGBITS, body);
    obj.symbol("_start", Place::Section(text), 0, 96, GLOBAL_FUNC);

    let image = Image::load(&obj.build()).unwrap();
    let options = LinkOptions {
        params: CompressionParameters::default(),
        search: SearchConfig { generations: 1, seed: 42 },
        strict: true,
    };
    let out = link(&image, &stub32(), &options).unwrap();
    assert_eq!(out.params.context_count, 8);
    // Strict mode already verified the round trip; check the trailer matches the winner.
    let count = out.params.context_count;
    let trailer = out.image.len() - 2 * count - 4;
    assert_eq!(&out.image[trailer + 4..trailer + 4 + count], &out.params.weights[..count]);
}
