//! The built-in C library prelude.
//!
//! Compiled ahead of the user program unless `--no-libc` is given.  The
//! only primitive is `__syscall(num, a, b, c)`, which the emitter binds to
//! a synthetic stub marshalling the four argument registers into the
//! kernel ABI.

pub const PRELUDE: &str = r#"
/* minimal runtime on top of the __syscall trampoline */

void exit(int code)
{
    __syscall(93, code);
}

void abort()
{
    __syscall(93, 134);
}

int write(int fd, char *buf, int count)
{
    return __syscall(64, fd, buf, count);
}

int strlen(char *s)
{
    int n = 0;
    while (s[n] != 0) {
        n = n + 1;
    }
    return n;
}

void print(char *s)
{
    write(1, s, strlen(s));
}
"#;
