//! ELF executable image writer.
//!
//! The output is a single statically linked image mapped at a fixed load
//! address: ELF header and one RWX `PT_LOAD` program header (0x54 bytes
//! together), the code section, the global data area, and a small
//! symbol/string/section-header tail for the benefit of disassemblers.
//! The entry stub sits at code offset 0, so the entry point is the first
//! code byte.
//!
//! The core appends into the code and data buffers through
//! [Elf::write_code_word] / [Elf::write_data_word]; the buffers are
//! serialized unchanged.

/// Fixed virtual load address of the image.
pub const LOAD_ADDR: i32 = 0x10000;

/// ELF header plus one program header.
pub const HEADER_LEN: i32 = 0x54;

/// Virtual address of code offset 0; also the image-base constant added
/// wherever an absolute code address is materialized.
pub const CODE_START: i32 = LOAD_ADDR + HEADER_LEN;

pub struct Elf {
    pub code: Vec<u8>,
    pub data: Vec<u8>,
    symbols: Vec<(String, i32)>,
}

impl Elf {
    pub fn new() -> Self {
        Elf {
            code: Vec::new(),
            data: Vec::new(),
            symbols: Vec::new(),
        }
    }

    /// Append one machine word to the code buffer.
    pub fn write_code_word(&mut self, word: u32) {
        self.code.extend_from_slice(&word.to_le_bytes());
    }

    /// Append one word to the global data area.
    pub fn write_data_word(&mut self, word: u32) {
        self.data.extend_from_slice(&word.to_le_bytes());
    }

    /// Register a function symbol at a code byte offset.
    pub fn add_symbol(&mut self, name: &str, offset: i32) {
        self.symbols.push((name.to_owned(), offset));
    }

    pub fn code_len(&self) -> i32 {
        self.code.len() as i32
    }

    /// Serialize the executable image.
    pub fn render(&self) -> Vec<u8> {
        let code_off = HEADER_LEN as u32;
        let data_off = code_off + self.code.len() as u32;

        // .shstrtab body; the constants below index into it
        let shstrtab = b"\0.text\0.data\0.shstrtab\0.symtab\0.strtab\0";
        let shstr_off = data_off + self.data.len() as u32;

        let mut symtab = vec![0u8; 16]; // null symbol
        let mut strtab = vec![0u8];
        for (name, offset) in &self.symbols {
            push_u32(&mut symtab, strtab.len() as u32);
            push_u32(&mut symtab, (CODE_START + offset) as u32);
            push_u32(&mut symtab, 0); // st_size
            symtab.push(0x12); // global function
            symtab.push(0);
            symtab.extend_from_slice(&1u16.to_le_bytes()); // .text
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }
        let symtab_off = shstr_off + shstrtab.len() as u32;
        let strtab_off = symtab_off + symtab.len() as u32;
        let sh_off = strtab_off + strtab.len() as u32;

        let file_size = HEADER_LEN as u32 + self.code.len() as u32 + self.data.len() as u32;

        let mut out = Vec::new();

        // ELF header
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        push_u16(&mut out, 2); // ET_EXEC
        push_u16(&mut out, 0xf3); // EM_RISCV
        push_u32(&mut out, 1);
        push_u32(&mut out, CODE_START as u32); // entry
        push_u32(&mut out, 0x34); // phoff
        push_u32(&mut out, sh_off);
        push_u32(&mut out, 0); // flags
        push_u16(&mut out, 0x34);
        push_u16(&mut out, 0x20);
        push_u16(&mut out, 1); // one program header
        push_u16(&mut out, 0x28);
        push_u16(&mut out, 6); // section count
        push_u16(&mut out, 3); // .shstrtab index

        // the single loadable segment covers headers, code, and data
        push_u32(&mut out, 1); // PT_LOAD
        push_u32(&mut out, 0);
        push_u32(&mut out, LOAD_ADDR as u32);
        push_u32(&mut out, LOAD_ADDR as u32);
        push_u32(&mut out, file_size);
        push_u32(&mut out, file_size);
        push_u32(&mut out, 7); // rwx
        push_u32(&mut out, 0x1000);

        out.extend_from_slice(&self.code);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(shstrtab);
        out.extend_from_slice(&symtab);
        out.extend_from_slice(&strtab);

        // section headers: null, .text, .data, .shstrtab, .symtab, .strtab
        section(&mut out, [0; 10]);
        section(
            &mut out,
            [1, 1, 0x6, CODE_START as u32, code_off, self.code.len() as u32, 0, 0, 4, 0],
        );
        section(
            &mut out,
            [
                7,
                1,
                0x3,
                (CODE_START + self.code.len() as i32) as u32,
                data_off,
                self.data.len() as u32,
                0,
                0,
                4,
                0,
            ],
        );
        section(
            &mut out,
            [13, 3, 0, 0, shstr_off, shstrtab.len() as u32, 0, 0, 1, 0],
        );
        section(
            &mut out,
            [23, 2, 0, 0, symtab_off, symtab.len() as u32, 5, 1, 4, 16],
        );
        section(
            &mut out,
            [31, 3, 0, 0, strtab_off, strtab.len() as u32, 0, 0, 1, 0],
        );

        out
    }
}

impl Default for Elf {
    fn default() -> Self {
        Elf::new()
    }
}

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// name, type, flags, addr, offset, size, link, info, addralign, entsize.
fn section(buf: &mut Vec<u8>, fields: [u32; 10]) {
    for field in fields {
        push_u32(buf, field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_layout() {
        let mut elf = Elf::new();
        elf.write_code_word(0x0000_0013);
        elf.write_code_word(0x0000_0073);
        elf.write_data_word(0);
        elf.add_symbol("main", 0);
        let image = elf.render();

        assert_eq!(&image[0..4], &[0x7f, b'E', b'L', b'F']);
        // entry point at e_entry
        assert_eq!(
            u32::from_le_bytes(image[0x18..0x1c].try_into().unwrap()),
            CODE_START as u32
        );
        // p_filesz covers headers + code + data
        assert_eq!(
            u32::from_le_bytes(image[0x34 + 16..0x34 + 20].try_into().unwrap()),
            (HEADER_LEN + 8 + 4) as u32
        );
        // code lands right after the headers
        assert_eq!(
            u32::from_le_bytes(image[0x54..0x58].try_into().unwrap()),
            0x0000_0013
        );
    }

    #[test]
    fn symbols_carry_absolute_addresses() {
        let mut elf = Elf::new();
        elf.write_code_word(0);
        elf.add_symbol("__start", 0);
        elf.add_symbol("main", 4);
        let image = elf.render();
        // symtab begins after headers, code, data, and shstrtab
        let shstrtab_len = b"\0.text\0.data\0.shstrtab\0.symtab\0.strtab\0".len();
        let symtab = HEADER_LEN as usize + 4 + shstrtab_len;
        let second = symtab + 32; // null entry + first symbol
        assert_eq!(
            u32::from_le_bytes(image[second + 4..second + 8].try_into().unwrap()),
            (CODE_START + 4) as u32
        );
    }
}
